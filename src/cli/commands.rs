use clap::Subcommand;

use super::candidates::CandidatesArgs;
use super::inspect::InspectArgs;
use super::replay::ReplayArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Replay a recorded step file against a running browser
    Replay(ReplayArgs),

    /// Print ranked selector candidates for captured element metadata
    Candidates(CandidatesArgs),

    /// Validate a step file and print its tree
    Inspect(InspectArgs),
}
