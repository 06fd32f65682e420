// ==========================================
// Residency Scheduler - Conflict detection and remediation
// ==========================================
// detector: rescans committed assignments against every hard constraint
//           and upserts fingerprinted ConflictRecords
// resolver: substitute -> exchange -> escalate, reusing swap validation;
//           low confidence or keystone cases become review proposals
// ==========================================

mod detector;
mod resolver;

#[cfg(test)]
mod tests;

pub use detector::{conflict_type_for, ConflictDetector, ConflictReport};
pub use resolver::{ConflictResolver, ResolutionOutcome, ResolutionStrategy};
