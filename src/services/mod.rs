pub mod lobby;

pub use lobby::{LiveSession, LobbyService};
