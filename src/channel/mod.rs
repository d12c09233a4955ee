//! Bidirectional channel to the live conversational engine

pub mod client;
pub mod messages;

pub use client::{
    ChannelConfig, ChannelConnector, ChannelEvent, Connection, LiveChannel, LiveConnector,
    VoiceChannel,
};
pub use messages::{
    parse_server_message, AudioPart, ClientMessage, FunctionCall, FunctionDeclaration,
    FunctionResponse, ServerContent, ServerMessage, ServerPart, Speaker, TextPart,
};
