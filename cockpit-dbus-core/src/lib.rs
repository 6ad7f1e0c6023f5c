pub mod codec;
pub mod error;
pub mod ids;
pub mod marshal;
pub mod message;
pub mod meta;
pub mod names;
pub mod notify;
pub mod sequence;
pub mod signature;

pub use codec::{decode_message, encode_message, CodecError, FrameBuffer, FrameFormat};
pub use error::{DbusError, Problem};
pub use ids::{CallId, CallIdAllocator};
pub use message::{
    validate_call, CallOptions, Frame, FrameError, MatchRule, Message, OpenOptions, SignalMessage,
    WatchSelector,
};
pub use meta::{InterfaceInfo, MetaData, MethodInfo, PropertyInfo, SignalInfo};
pub use notify::{NotifyDiff, Properties};
pub use sequence::{SequenceError, Sequencer};
pub use signature::{DbusType, Signature, SignatureError};
