/// Return this error from a virtual user's behaviour to indicate that the user is bailing.
///
/// This should be used when a virtual user hits a condition that is fatal to that user but not to
/// the run. The canonical case is a dataset configured with the stop-user exhaustion policy: the
/// user that drained the dataset stops, the rest of the scenario keeps going.
#[derive(derive_more::Error, derive_more::Display, Debug)]
pub struct UserBailError {
    msg: String,
}

impl Default for UserBailError {
    fn default() -> Self {
        Self {
            msg: "Virtual user is bailing".to_string(),
        }
    }
}

impl UserBailError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}
