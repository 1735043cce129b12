//! Database models for the invitation redemption core

pub mod invitation;
pub mod redeem_request;

pub use invitation::{Invitation, InvitationState, NewInvitation};
pub use redeem_request::{NewRedeemRequest, RedeemRequest, RequestState};
