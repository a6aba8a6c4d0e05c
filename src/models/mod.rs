pub mod channel;
pub mod playlist;
pub mod state;

pub use channel::Channel;
pub use playlist::{CreatePlaylistRequest, Playlist, PlaylistsResponse};
pub use state::{ChannelListState, ChannelsResponse, SelectionPhase, StateSummary};
