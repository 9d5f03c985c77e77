//! In-process decode engine. Decoders are Rust state machines registered in a
//! `Registry`; a `Session` instantiates them, stacks them, feeds them samples
//! and routes what they emit.

mod decoder;
mod session;
mod value;

pub use decoder::{
    ChannelDef, ClassDef, Decoder, DecoderDefinition, DecoderFactory, OptionDef, OptionValue,
    Options, Registry,
};
pub use session::{
    Instance, InstanceId, InstanceInfo, Output, OutputCallback, OutputData, OutputKind,
    OutputRecord, Samples, Session, SessionError,
};
pub use value::Value;
