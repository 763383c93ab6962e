pub mod conversation;
pub mod message;
pub mod profile;
pub mod turn;
