use std::collections::HashMap;
use std::fmt;

use gust_core::prelude::RuntimeError;
use parking_lot::Mutex;

/// Identifies one virtual user on this worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub u32);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user-{}", self.0)
    }
}

/// A bound variable value. Extractions with match index `all` bind the full ordered sequence of
/// matches; everything else binds a single text value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    Sequence(Vec<String>),
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(value.into())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            Value::Sequence(items) => f.write_str(&items.join(",")),
        }
    }
}

/// The resolution tier a binding came from, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    SessionCorrelation,
    GlobalCorrelation,
    Dataset,
    UserDefined,
    Default,
}

/// A successful resolution: exactly one value, tagged with the tier that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub value: Value,
    pub origin: Tier,
}

/// Per-virtual-user state: the session correlation map and the columns of the dataset rows
/// currently assigned to this user.
///
/// Owned exclusively by the user's task, so reads and writes here take no lock. Created at
/// user start and dropped at user stop, which is what scopes session correlation records to the
/// user's lifetime.
#[derive(Debug)]
pub struct UserContext {
    id: UserId,
    session: HashMap<String, Value>,
    dataset: HashMap<String, Value>,
    iteration: u64,
}

impl UserContext {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            session: HashMap::new(),
            dataset: HashMap::new(),
            iteration: 0,
        }
    }

    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn begin_iteration(&mut self) -> u64 {
        self.iteration += 1;
        self.iteration
    }

    pub(crate) fn bind_session(&mut self, key: impl Into<String>, value: Value) {
        self.session.insert(key.into(), value);
    }

    /// Replaces the user's view of one dataset's columns with a freshly acquired row. All
    /// columns land together, which is what keeps row integrity observable.
    pub(crate) fn assign_row<'a>(&mut self, columns: impl Iterator<Item = (&'a str, &'a str)>) {
        for (column, value) in columns {
            self.dataset
                .insert(column.to_string(), Value::text(value));
        }
    }
}

/// The variable arena consulted by every request resolution.
///
/// Tier layout:
/// 1. session correlation (inside [`UserContext`], lock free)
/// 2. global correlation (one mutex, shared by all users)
/// 3. dataset columns (inside [`UserContext`], populated under the dataset's own lock)
/// 4. user-defined plan constants (immutable)
/// 5. call-site static default
#[derive(Debug)]
pub struct VariableStore {
    global: Mutex<HashMap<String, Value>>,
    user_defined: HashMap<String, String>,
}

impl VariableStore {
    pub fn new(user_defined: HashMap<String, String>) -> Self {
        Self {
            global: Mutex::new(HashMap::new()),
            user_defined,
        }
    }

    /// Resolves `key` for one virtual user, first hit wins top-down. Read only: no tier is
    /// modified by a resolution.
    pub fn resolve(&self, key: &str, user: &UserContext) -> Result<Resolved, RuntimeError> {
        self.resolve_or(key, user, None)
    }

    /// [`VariableStore::resolve`] with a call-site static default as the final tier.
    pub fn resolve_or(
        &self,
        key: &str,
        user: &UserContext,
        default: Option<&str>,
    ) -> Result<Resolved, RuntimeError> {
        if let Some(value) = user.session.get(key) {
            return Ok(Resolved {
                value: value.clone(),
                origin: Tier::SessionCorrelation,
            });
        }

        if let Some(value) = self.global.lock().get(key) {
            return Ok(Resolved {
                value: value.clone(),
                origin: Tier::GlobalCorrelation,
            });
        }

        if let Some(value) = user.dataset.get(key) {
            return Ok(Resolved {
                value: value.clone(),
                origin: Tier::Dataset,
            });
        }

        if let Some(value) = self.user_defined.get(key) {
            return Ok(Resolved {
                value: Value::text(value.clone()),
                origin: Tier::UserDefined,
            });
        }

        if let Some(default) = default {
            return Ok(Resolved {
                value: Value::text(default),
                origin: Tier::Default,
            });
        }

        Err(RuntimeError::UnresolvedVariable {
            key: key.to_string(),
        })
    }

    /// Binds a session-scoped correlation value for one user. Overwrites only that user's map.
    pub fn bind_session(&self, user: &mut UserContext, key: impl Into<String>, value: Value) {
        user.bind_session(key, value);
    }

    /// Binds a global correlation value. Writes are serialized across all users and the last
    /// writer wins; there is no versioning beyond the total order of completion.
    pub fn bind_global(&self, key: impl Into<String>, value: Value) {
        self.global.lock().insert(key.into(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store_with_user_defined(key: &str, value: &str) -> VariableStore {
        let mut user_defined = HashMap::new();
        user_defined.insert(key.to_string(), value.to_string());
        VariableStore::new(user_defined)
    }

    #[test]
    fn precedence_session_beats_every_other_tier() {
        let store = store_with_user_defined("token", "from-plan");
        let mut user = UserContext::new(UserId(1));

        store.bind_global("token", Value::text("from-global"));
        user.assign_row([("token", "from-dataset")].into_iter());
        store.bind_session(&mut user, "token", Value::text("from-session"));

        let resolved = store.resolve("token", &user).unwrap();
        assert_eq!(resolved.value, Value::text("from-session"));
        assert_eq!(resolved.origin, Tier::SessionCorrelation);
    }

    #[test]
    fn precedence_walks_down_as_tiers_are_removed() {
        let store = store_with_user_defined("token", "from-plan");
        let mut user = UserContext::new(UserId(1));

        store.bind_global("token", Value::text("from-global"));
        user.assign_row([("token", "from-dataset")].into_iter());

        let resolved = store.resolve("token", &user).unwrap();
        assert_eq!(resolved.origin, Tier::GlobalCorrelation);

        // A fresh user context has no dataset assignment, so the global value still wins over
        // the plan constant.
        let other = UserContext::new(UserId(2));
        assert_eq!(
            store.resolve("token", &other).unwrap().origin,
            Tier::GlobalCorrelation
        );
    }

    #[test]
    fn dataset_beats_user_defined() {
        let store = store_with_user_defined("city", "from-plan");
        let mut user = UserContext::new(UserId(1));
        user.assign_row([("city", "Houston")].into_iter());

        let resolved = store.resolve("city", &user).unwrap();
        assert_eq!(resolved.value, Value::text("Houston"));
        assert_eq!(resolved.origin, Tier::Dataset);
    }

    #[test]
    fn static_default_is_the_last_resort() {
        let store = VariableStore::new(HashMap::new());
        let user = UserContext::new(UserId(1));

        let resolved = store.resolve_or("missing", &user, Some("fallback")).unwrap();
        assert_eq!(resolved.value, Value::text("fallback"));
        assert_eq!(resolved.origin, Tier::Default);

        let err = store.resolve("missing", &user).unwrap_err();
        assert!(matches!(
            err,
            gust_core::prelude::RuntimeError::UnresolvedVariable { .. }
        ));
    }

    #[test]
    fn bind_then_resolve_round_trips() {
        let store = VariableStore::new(HashMap::new());
        let mut user = UserContext::new(UserId(1));

        store.bind_session(&mut user, "a", Value::text("1"));
        store.bind_global("b", Value::text("2"));

        assert_eq!(store.resolve("a", &user).unwrap().value, Value::text("1"));
        assert_eq!(store.resolve("b", &user).unwrap().value, Value::text("2"));
    }

    #[test]
    fn session_binds_are_invisible_to_other_users() {
        let store = VariableStore::new(HashMap::new());
        let mut alice = UserContext::new(UserId(1));
        let bob = UserContext::new(UserId(2));

        store.bind_session(&mut alice, "token", Value::text("abc123"));

        assert!(store.resolve("token", &alice).is_ok());
        assert!(store.resolve("token", &bob).is_err());
    }

    #[test]
    fn sequence_values_render_joined() {
        let value = Value::Sequence(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(value.to_string(), "a,b");
    }
}
