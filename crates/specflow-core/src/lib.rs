//! Stage workflow and checklist engine for specflow features.

pub mod batch;
pub mod config;
pub mod matcher;
pub mod next_task;
pub mod stage;
pub mod store;
pub mod task;
pub mod workflow;

pub use batch::{
    complete_batch, complete_batch_with, complete_task, BatchResult, RejectReason, Rejection,
};
pub use next_task::get_first_uncompleted_task;
pub use stage::{current_stage, Stage, StageRecord};
pub use task::{parse_tasks, parse_tasks_with, Task};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
