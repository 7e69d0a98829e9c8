pub mod channels;
pub mod types;

pub use channels::{
    DEFAULT_CHANNEL_BUFFER, MatcherEventReceiver, MatcherEventSender, PollTickReceiver,
    PollTickSender, PushCommandReceiver, PushCommandSender, matcher_event_channel,
    poll_tick_channel, push_command_channel,
};
pub use types::{MatcherEvent, PollTick, PushCommand};
