//! Data model exports.

mod broadcast;
mod invite_link;
mod member;

pub use broadcast::{
    BroadcastRun, DeliveryState, MessagePayload, RecipientOutcome, RunProgress, RunStatus,
};
pub use invite_link::InviteLink;
pub use member::{Attribution, Member, MemberStatus, StatusCounts};
