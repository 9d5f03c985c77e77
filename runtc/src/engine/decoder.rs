use std::{collections::BTreeMap, fmt, rc::Rc};

use anyhow::{bail, Result};

use super::{
    session::{Output, Samples},
    Value,
};
use crate::error::RunError;

/// Typed option value, as declared by a decoder and as handed to it.
#[derive(Clone, Debug, PartialEq)]
pub enum OptionValue {
    Str(String),
    Int(i64),
    Float(f64),
}

impl OptionValue {
    /// Convert `self` to the type of `like`. Strings coming from the command
    /// line are parsed; numbers are only widened.
    pub fn coerce_to(&self, like: &OptionValue) -> Option<OptionValue> {
        match (self, like) {
            (OptionValue::Str(s), OptionValue::Str(_)) => Some(OptionValue::Str(s.clone())),
            (OptionValue::Str(s), OptionValue::Int(_)) => s.trim().parse().ok().map(OptionValue::Int),
            (OptionValue::Str(s), OptionValue::Float(_)) => {
                s.trim().parse().ok().map(OptionValue::Float)
            }
            (OptionValue::Int(v), OptionValue::Int(_)) => Some(OptionValue::Int(*v)),
            (OptionValue::Int(v), OptionValue::Float(_)) => Some(OptionValue::Float(*v as f64)),
            (OptionValue::Float(v), OptionValue::Float(_)) => Some(OptionValue::Float(*v)),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            OptionValue::Str(_) => "string",
            OptionValue::Int(_) => "integer",
            OptionValue::Float(_) => "float",
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Str(s) => f.write_str(s),
            OptionValue::Int(v) => write!(f, "{v}"),
            OptionValue::Float(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChannelDef {
    pub id: String,
    pub desc: String,
}

#[derive(Clone, Debug)]
pub struct OptionDef {
    pub id: String,
    pub desc: String,
    pub default: OptionValue,
    /// If non-empty, the only values accepted.
    pub values: Vec<OptionValue>,
}

/// An annotation or binary output class. `id` is what test cases select
/// and what appears in the output lines.
#[derive(Clone, Debug)]
pub struct ClassDef {
    pub id: String,
    pub desc: String,
}

/// Resolved options for one instance: every declared option, with the test
/// case's value where one was given and the default otherwise.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Options(BTreeMap<String, OptionValue>);

impl Options {
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.0.get(key)
    }

    pub fn str(&self, key: &str) -> Result<&str> {
        match self.0.get(key) {
            Some(OptionValue::Str(s)) => Ok(s),
            Some(v) => bail!("Option '{key}' has type {}, not string", v.type_name()),
            None => bail!("No option '{key}'"),
        }
    }

    pub fn int(&self, key: &str) -> Result<i64> {
        match self.0.get(key) {
            Some(OptionValue::Int(v)) => Ok(*v),
            Some(v) => bail!("Option '{key}' has type {}, not integer", v.type_name()),
            None => bail!("No option '{key}'"),
        }
    }
}

/// The per-instance state machine of a protocol decoder.
///
/// Bottom instances get `decode` with raw samples; stacked instances get
/// `decode_stacked` with the raw-object output of the instance below. An
/// error stops the instance for the rest of the session.
pub trait Decoder {
    fn start(&mut self, _samplerate: u64) -> Result<()> {
        Ok(())
    }

    fn decode(&mut self, samples: &Samples<'_>, _out: &mut Output<'_, '_>) -> Result<()> {
        bail!(
            "decoder does not take logic input (got samples {}-{})",
            samples.start(),
            samples.end()
        )
    }

    fn decode_stacked(
        &mut self,
        start_sample: u64,
        end_sample: u64,
        _data: &Value,
        _out: &mut Output<'_, '_>,
    ) -> Result<()> {
        bail!("decoder cannot be stacked (got data for {start_sample}-{end_sample})")
    }
}

pub type DecoderFactory = Box<dyn Fn(&Options) -> Result<Box<dyn Decoder>>>;

/// Static description of a decoder. Class lists are ordered; output records
/// refer to classes by index.
pub struct DecoderDefinition {
    pub id: String,
    pub name: String,
    pub desc: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub channels: Vec<ChannelDef>,
    pub optional_channels: Vec<ChannelDef>,
    pub options: Vec<OptionDef>,
    pub annotations: Vec<ClassDef>,
    pub binary: Vec<ClassDef>,
    factory: DecoderFactory,
}

impl fmt::Debug for DecoderDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderDefinition")
            .field("id", &self.id)
            .field("channels", &self.channels)
            .field("optional_channels", &self.optional_channels)
            .field("annotations", &self.annotations)
            .field("binary", &self.binary)
            .finish_non_exhaustive()
    }
}

impl DecoderDefinition {
    pub fn new(
        id: &str,
        factory: impl Fn(&Options) -> Result<Box<dyn Decoder>> + 'static,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            desc: String::new(),
            inputs: vec!["logic".to_string()],
            outputs: Vec::new(),
            channels: Vec::new(),
            optional_channels: Vec::new(),
            options: Vec::new(),
            annotations: Vec::new(),
            binary: Vec::new(),
            factory: Box::new(factory),
        }
    }

    pub fn describe(mut self, name: &str, desc: &str) -> Self {
        self.name = name.to_string();
        self.desc = desc.to_string();
        self
    }

    pub fn inputs(mut self, inputs: &[&str]) -> Self {
        self.inputs = inputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn outputs(mut self, outputs: &[&str]) -> Self {
        self.outputs = outputs.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn channel(mut self, id: &str, desc: &str) -> Self {
        self.channels.push(ChannelDef {
            id: id.to_string(),
            desc: desc.to_string(),
        });
        self
    }

    pub fn optional_channel(mut self, id: &str, desc: &str) -> Self {
        self.optional_channels.push(ChannelDef {
            id: id.to_string(),
            desc: desc.to_string(),
        });
        self
    }

    pub fn option(mut self, id: &str, desc: &str, default: OptionValue, values: &[OptionValue]) -> Self {
        self.options.push(OptionDef {
            id: id.to_string(),
            desc: desc.to_string(),
            default,
            values: values.to_vec(),
        });
        self
    }

    pub fn annotation(mut self, id: &str, desc: &str) -> Self {
        self.annotations.push(ClassDef {
            id: id.to_string(),
            desc: desc.to_string(),
        });
        self
    }

    pub fn binary(mut self, id: &str, desc: &str) -> Self {
        self.binary.push(ClassDef {
            id: id.to_string(),
            desc: desc.to_string(),
        });
        self
    }

    /// All channels, required first. A channel's position here is the index
    /// decoders use with `Samples::level`.
    pub fn all_channels(&self) -> impl Iterator<Item = &ChannelDef> {
        self.channels.iter().chain(self.optional_channels.iter())
    }

    pub fn channel_index(&self, id: &str) -> Option<usize> {
        self.all_channels().position(|c| c.id == id)
    }

    /// Apply option bindings on top of the declared defaults.
    pub fn resolve_options<'a>(
        &self,
        bindings: impl IntoIterator<Item = (&'a str, &'a OptionValue)>,
    ) -> Result<Options, String> {
        let mut resolved: BTreeMap<String, OptionValue> = self
            .options
            .iter()
            .map(|o| (o.id.clone(), o.default.clone()))
            .collect();
        for (key, value) in bindings {
            let def = self
                .options
                .iter()
                .find(|o| o.id == key)
                .ok_or_else(|| format!("Decoder {} has no option '{key}'.", self.id))?;
            let value = value.coerce_to(&def.default).ok_or_else(|| {
                format!(
                    "Option '{key}' of decoder {} expects a value of type {}, got '{value}'.",
                    self.id,
                    def.default.type_name()
                )
            })?;
            if !def.values.is_empty() && !def.values.contains(&value) {
                return Err(format!(
                    "Invalid value '{value}' for option '{key}' of decoder {}.",
                    self.id
                ));
            }
            resolved.insert(key.to_string(), value);
        }
        Ok(Options(resolved))
    }

    pub fn create(&self, options: &Options) -> Result<Box<dyn Decoder>> {
        (self.factory)(options)
    }
}

/// The set of decoders a run can load by id.
#[derive(Default)]
pub struct Registry {
    decoders: BTreeMap<String, Rc<DecoderDefinition>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the decoders bundled in this crate.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        crate::decoders::register_all(&mut registry);
        registry
    }

    pub fn register(&mut self, def: DecoderDefinition) {
        self.decoders.insert(def.id.clone(), Rc::new(def));
    }

    pub fn load(&self, id: &str) -> Result<Rc<DecoderDefinition>, RunError> {
        self.decoders
            .get(id)
            .cloned()
            .ok_or_else(|| RunError::DecoderNotFound(id.to_string()))
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.decoders.keys().map(|k| k.as_str())
    }
}
