//! Document stores backing the service

pub mod chats;
pub mod games;
pub mod media;
pub mod players;
pub mod requests;

pub use chats::ChatStore;
pub use games::GameStore;
pub use media::MediaStore;
pub use players::PlayerStore;
pub use requests::RequestStore;
