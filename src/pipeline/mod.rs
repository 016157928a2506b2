//! The resume intake pipeline.
//!
//! Every run walks the stages in a fixed order:
//! 1. `ingest` appends a record per unseen message
//! 2. `archive` stores the raw message body
//! 3. `convert` turns archived HTML into Markdown with the LLM
//! 4. `extract` pulls contact fields out of the Markdown
//! 5. `evaluate` runs the review and summary prompts
//! 6. `invite` emails strong candidates (opt-in)
//! 7. `report` sends one digest of new evaluations
//!
//! Each stage picks its records by guard fields on the record, so running
//! a stage again only touches records that still need work.

pub mod archive;
pub mod convert;
pub mod evaluate;
pub mod extract;
pub mod ingest;
pub mod invite;
pub mod orchestrator;
pub mod prompt;
pub mod report;
pub mod rules;
pub mod types;

pub use orchestrator::{BatchSummary, Pipeline};
pub use types::{PipelineDeps, Stage, StageName, StageReport};
