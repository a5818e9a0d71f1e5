//! The executable half of gust: plan interpretation, virtual-user management and run
//! orchestration. The HTTP layer stays behind the [`prelude::Transport`] seam so the runtime
//! can be driven by any client implementation, including scripted ones in tests.

mod cli;
mod interpret;
mod progress;
mod run;
mod shutdown;
mod transport;
mod worker;

pub mod prelude {
    pub use crate::cli::{init, load_plan, GustCli};
    pub use crate::interpret::{Interpreter, RunStats};
    pub use crate::run::{run, RunReport};
    pub use crate::transport::{ResolvedRequest, Transport, TransportResponse};
    pub use crate::worker::WorkerAgent;
    pub use gust_coordinator::prelude::{
        ControlPlane, LoadShapeConfig, LoadSnapshot, ScenarioDelta, ScenarioPhase,
        ScenarioRegistry,
    };
    pub use gust_core::prelude::{RuntimeError, ShutdownHandle, UserBailError};
    pub use gust_engine::prelude::{UserContext, UserId, VariableStore};
    pub use gust_plan::prelude::TestPlan;
}
