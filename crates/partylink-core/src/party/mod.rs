//! Party membership, replication and join flows

pub mod invite;
pub mod legacy;
pub mod member;
pub mod party;
pub mod state;

pub use invite::{AutoConfirm, ConfirmationPolicy, Invitation, PendingMember};
pub use legacy::{JoinStrategy, LegacyJoin};
pub use member::Member;
pub use party::Party;
pub use state::{MemberState, PartyPhase, PartyState};
