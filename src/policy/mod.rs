//! Admission policies consulted by the dispatch engine.

pub mod cooldown;
pub mod milestones;
pub mod moderators;
pub mod quota;

pub use cooldown::{CooldownPolicy, UserCooldown};
pub use milestones::MilestoneLadder;
pub use moderators::{ModeratorCache, ModeratorDirectory};
pub use quota::{QuotaController, QuotaCounter, QuotaLane};
