use std::rc::Rc;

use anyhow::{bail, Result};
use derive_more::{From, Into};
use log::{debug, error, warn};
use thiserror::Error;
use typed_index_collections::TiVec;

use super::{Decoder, DecoderDefinition, Options, Value};
use crate::channels::ChannelMap;

#[derive(From, Into, Debug, Default, Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct InstanceId(pub usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OutputKind {
    Annotation,
    Binary,
    RawObject,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session metadata cannot change after the session has started")]
    MetadataAfterStart,
    #[error("samplerate must be non-zero")]
    InvalidSamplerate,
    #[error("session started without a samplerate")]
    NoSamplerate,
    #[error("session already started")]
    AlreadyStarted,
    #[error("session not started")]
    NotStarted,
    #[error("invalid unit size {0}")]
    InvalidUnitSize(usize),
    #[error("no instance {0:?}")]
    NoInstance(InstanceId),
    #[error("decoder {decoder} has no channel '{channel}'")]
    NoChannel { decoder: String, channel: String },
    #[error("instance {inst_id} is missing required channel '{channel}'")]
    MissingChannel { inst_id: String, channel: String },
    #[error("failed to create instance of {decoder}: {source}")]
    Create {
        decoder: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("cannot stack {child} on {parent}: {reason}")]
    Stack {
        parent: String,
        child: String,
        reason: &'static str,
    },
    #[error("instance {inst_id} failed to start: {source}")]
    Start {
        inst_id: String,
        #[source]
        source: anyhow::Error,
    },
}

/// Receives the output records of one kind.
pub trait OutputCallback {
    fn on_output(&mut self, record: &OutputRecord<'_>);
}

#[derive(Clone, Copy, Debug)]
pub enum OutputData<'a> {
    Annotation { class: usize, texts: &'a [String] },
    Binary { class: usize, data: &'a [u8] },
    RawObject(&'a Value),
}

impl OutputData<'_> {
    pub fn kind(&self) -> OutputKind {
        match self {
            OutputData::Annotation { .. } => OutputKind::Annotation,
            OutputData::Binary { .. } => OutputKind::Binary,
            OutputData::RawObject(_) => OutputKind::RawObject,
        }
    }

    /// Class index for annotation and binary output.
    pub fn class(&self) -> Option<usize> {
        match self {
            OutputData::Annotation { class, .. } | OutputData::Binary { class, .. } => {
                Some(*class)
            }
            OutputData::RawObject(_) => None,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct OutputRecord<'a> {
    pub inst_id: &'a str,
    pub decoder: &'a DecoderDefinition,
    pub start_sample: u64,
    pub end_sample: u64,
    pub data: OutputData<'a>,
}

#[derive(Debug)]
pub struct InstanceInfo {
    pub inst_id: String,
    pub decoder: Rc<DecoderDefinition>,
    /// The instance whose output this one consumes. `None` for instances
    /// fed with samples.
    pub parent: Option<InstanceId>,
    pub children: Vec<InstanceId>,
    /// Physical channel for each of the decoder's channels, in
    /// `DecoderDefinition::all_channels` order.
    pub channel_map: Vec<Option<usize>>,
    /// Bytes per sample the channel map needs.
    pub group_count: usize,
}

pub struct Instance {
    pub info: InstanceInfo,
    decoder: Box<dyn Decoder>,
    failed: bool,
}

impl Instance {
    pub fn failed(&self) -> bool {
        self.failed
    }
}

/// A window of logic samples as seen by one instance.
pub struct Samples<'a> {
    start: u64,
    end: u64,
    unit_size: usize,
    data: &'a [u8],
    channel_map: &'a [Option<usize>],
}

impl<'a> Samples<'a> {
    /// Absolute index of the first sample.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Absolute index one past the last sample.
    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn unit_size(&self) -> usize {
        self.unit_size
    }

    /// Raw bytes of one sample, by absolute index.
    pub fn sample(&self, index: u64) -> Option<&'a [u8]> {
        if index < self.start || index >= self.end {
            return None;
        }
        let offset = (index - self.start) as usize * self.unit_size;
        self.data.get(offset..offset + self.unit_size)
    }

    /// Level of a decoder channel (by its index in the decoder's channel
    /// list) at an absolute sample index. `None` if the channel is unmapped
    /// or the sample is outside this window.
    pub fn level(&self, index: u64, channel: usize) -> Option<bool> {
        let physical = (*self.channel_map.get(channel)?)?;
        let byte = self.sample(index)?.get(physical / 8)?;
        Some(byte & (1 << (physical % 8)) != 0)
    }

    pub fn is_mapped(&self, channel: usize) -> bool {
        matches!(self.channel_map.get(channel), Some(Some(_)))
    }
}

#[derive(Default)]
struct Callbacks<'cb> {
    annotation: Option<&'cb mut dyn OutputCallback>,
    binary: Option<&'cb mut dyn OutputCallback>,
    raw_object: Option<&'cb mut dyn OutputCallback>,
}

impl<'cb> Callbacks<'cb> {
    fn slot(&mut self, kind: OutputKind) -> &mut Option<&'cb mut dyn OutputCallback> {
        match kind {
            OutputKind::Annotation => &mut self.annotation,
            OutputKind::Binary => &mut self.binary,
            OutputKind::RawObject => &mut self.raw_object,
        }
    }

    fn deliver(&mut self, record: &OutputRecord<'_>) {
        if let Some(cb) = self.slot(record.data.kind()) {
            cb.on_output(record);
        }
    }
}

/// Handed to a decoder while it runs. Everything put here is delivered
/// before the call returns: first to the registered callback, then, for
/// raw objects, to every instance stacked on the emitting one.
pub struct Output<'s, 'cb> {
    info: &'s InstanceInfo,
    /// Instances after the emitting one; children always live here.
    upper: &'s mut [Instance],
    /// Arena index of `upper[0]`.
    base: usize,
    callbacks: &'s mut Callbacks<'cb>,
}

impl Output<'_, '_> {
    pub fn inst_id(&self) -> &str {
        &self.info.inst_id
    }

    pub fn annotation(
        &mut self,
        start_sample: u64,
        end_sample: u64,
        class: usize,
        texts: &[&str],
    ) -> Result<()> {
        if class >= self.info.decoder.annotations.len() {
            bail!("put: invalid annotation class {class}");
        }
        let texts: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        self.put(start_sample, end_sample, OutputData::Annotation { class, texts: &texts })
    }

    pub fn binary(
        &mut self,
        start_sample: u64,
        end_sample: u64,
        class: usize,
        data: &[u8],
    ) -> Result<()> {
        if class >= self.info.decoder.binary.len() {
            bail!("put: invalid binary class {class}");
        }
        self.put(start_sample, end_sample, OutputData::Binary { class, data })
    }

    pub fn raw_object(&mut self, start_sample: u64, end_sample: u64, value: &Value) -> Result<()> {
        self.put(start_sample, end_sample, OutputData::RawObject(value))?;
        let info = self.info;
        for &child in &info.children {
            run_instance(
                self.upper,
                child.0 - self.base,
                self.base,
                self.callbacks,
                Input::Stacked {
                    start_sample,
                    end_sample,
                    value,
                },
            );
        }
        Ok(())
    }

    fn put(&mut self, start_sample: u64, end_sample: u64, data: OutputData<'_>) -> Result<()> {
        if end_sample < start_sample {
            bail!("put: end sample {end_sample} before start sample {start_sample}");
        }
        self.callbacks.deliver(&OutputRecord {
            inst_id: &self.info.inst_id,
            decoder: &self.info.decoder,
            start_sample,
            end_sample,
            data,
        });
        Ok(())
    }
}

enum Input<'a> {
    Samples {
        start: u64,
        end: u64,
        unit_size: usize,
        data: &'a [u8],
    },
    Stacked {
        start_sample: u64,
        end_sample: u64,
        value: &'a Value,
    },
}

/// Run one instance on one input. `instances[index]` is the instance and
/// `base` is the arena index of `instances[0]`. Decoder errors are logged and
/// stop the instance; they never reach the caller.
fn run_instance(
    instances: &mut [Instance],
    index: usize,
    base: usize,
    callbacks: &mut Callbacks<'_>,
    input: Input<'_>,
) {
    let (lower, upper) = instances.split_at_mut(index + 1);
    let instance = &mut lower[index];
    if instance.failed {
        return;
    }

    let mut out = Output {
        info: &instance.info,
        upper,
        base: base + index + 1,
        callbacks,
    };

    let result = match input {
        Input::Samples {
            start,
            end,
            unit_size,
            data,
        } => {
            if instance.info.group_count > unit_size {
                Err(anyhow::anyhow!(
                    "channels need {} bytes per sample but the data has {}",
                    instance.info.group_count,
                    unit_size
                ))
            } else {
                let samples = Samples {
                    start,
                    end,
                    unit_size,
                    data,
                    channel_map: &instance.info.channel_map,
                };
                instance.decoder.decode(&samples, &mut out)
            }
        }
        Input::Stacked {
            start_sample,
            end_sample,
            value,
        } => instance
            .decoder
            .decode_stacked(start_sample, end_sample, value, &mut out),
    };

    if let Err(e) = result {
        error!(target: "srd", "{}: {:#}", instance.info.inst_id, e);
        instance.failed = true;
    }
}

/// A decode session: an arena of decoder instances, the stacking between
/// them and the output callbacks. Dropping it destroys every instance.
pub struct Session<'cb> {
    instances: TiVec<InstanceId, Instance>,
    samplerate: Option<u64>,
    started: bool,
    callbacks: Callbacks<'cb>,
}

impl<'cb> Session<'cb> {
    pub fn new() -> Self {
        debug!(target: "srd", "Creating session.");
        Self {
            instances: TiVec::new(),
            samplerate: None,
            started: false,
            callbacks: Callbacks::default(),
        }
    }

    pub fn set_samplerate(&mut self, samplerate: u64) -> Result<(), SessionError> {
        if self.started {
            return Err(SessionError::MetadataAfterStart);
        }
        if samplerate == 0 {
            return Err(SessionError::InvalidSamplerate);
        }
        debug!(target: "srd", "Session samplerate set to {samplerate} Hz.");
        self.samplerate = Some(samplerate);
        Ok(())
    }

    pub fn samplerate(&self) -> Option<u64> {
        self.samplerate
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Register the callback for one output kind, replacing any previous one.
    pub fn register_output(&mut self, kind: OutputKind, callback: &'cb mut dyn OutputCallback) {
        debug!(target: "srd", "Registering output callback for {kind:?}.");
        *self.callbacks.slot(kind) = Some(callback);
    }

    pub fn new_instance(
        &mut self,
        decoder: Rc<DecoderDefinition>,
        options: &Options,
    ) -> Result<InstanceId, SessionError> {
        if self.started {
            return Err(SessionError::AlreadyStarted);
        }
        let implementation =
            decoder
                .create(options)
                .map_err(|source| SessionError::Create {
                    decoder: decoder.id.clone(),
                    source,
                })?;
        // Identity mapping until channels are bound explicitly.
        let num_channels = decoder.all_channels().count();
        let info = InstanceInfo {
            inst_id: decoder.id.clone(),
            channel_map: (0..num_channels).map(Some).collect(),
            group_count: num_channels.div_ceil(8),
            decoder,
            parent: None,
            children: Vec::new(),
        };
        debug!(target: "srd", "Creating new {} instance.", info.inst_id);
        Ok(self.instances.push_and_get_key(Instance {
            info,
            decoder: implementation,
            failed: false,
        }))
    }

    /// Bind decoder channels by name. Channels not in the map are left
    /// unmapped.
    pub fn bind_channels(&mut self, id: InstanceId, map: &ChannelMap) -> Result<(), SessionError> {
        let instance = self
            .instances
            .get_mut(id)
            .ok_or(SessionError::NoInstance(id))?;
        let info = &mut instance.info;
        let mut channel_map = vec![None; info.channel_map.len()];
        for (name, physical) in map.iter() {
            let index =
                info.decoder
                    .channel_index(name)
                    .ok_or_else(|| SessionError::NoChannel {
                        decoder: info.decoder.id.clone(),
                        channel: name.to_string(),
                    })?;
            channel_map[index] = Some(physical);
        }
        debug!(
            target: "srd",
            "Channel map for {}: {:?} ({} bytes per sample)",
            info.inst_id,
            channel_map,
            map.group_count()
        );
        info.channel_map = channel_map;
        info.group_count = map.group_count();
        Ok(())
    }

    /// Make `child` consume the raw-object output of `parent` instead of
    /// samples.
    pub fn stack(&mut self, parent: InstanceId, child: InstanceId) -> Result<(), SessionError> {
        let parent_info = &self
            .instances
            .get(parent)
            .ok_or(SessionError::NoInstance(parent))?
            .info;
        let child_info = &self
            .instances
            .get(child)
            .ok_or(SessionError::NoInstance(child))?
            .info;
        let err = |reason| SessionError::Stack {
            parent: parent_info.inst_id.clone(),
            child: child_info.inst_id.clone(),
            reason,
        };
        if child.0 <= parent.0 {
            return Err(err("the stacked instance must be created after its parent"));
        }
        if child_info.parent.is_some() {
            return Err(err("the instance is already stacked"));
        }
        if self.started {
            return Err(err("the session has already started"));
        }
        if !parent_info
            .decoder
            .outputs
            .iter()
            .any(|o| child_info.decoder.inputs.contains(o))
        {
            warn!(
                target: "srd",
                "Stacking {} (inputs {:?}) on {} (outputs {:?}): stream types do not match.",
                child_info.inst_id,
                child_info.decoder.inputs,
                parent_info.inst_id,
                parent_info.decoder.outputs
            );
        }
        debug!(target: "srd", "Stacking {} on {}.", child_info.inst_id, parent_info.inst_id);
        self.instances[child].info.parent = Some(parent);
        self.instances[parent].info.children.push(child);
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.started {
            return Err(SessionError::AlreadyStarted);
        }
        let samplerate = self.samplerate.ok_or(SessionError::NoSamplerate)?;
        for instance in self.instances.iter_mut() {
            let info = &instance.info;
            if info.parent.is_none() {
                for (index, channel) in info.decoder.channels.iter().enumerate() {
                    if info.channel_map[index].is_none() {
                        return Err(SessionError::MissingChannel {
                            inst_id: info.inst_id.clone(),
                            channel: channel.id.clone(),
                        });
                    }
                }
            }
            instance
                .decoder
                .start(samplerate)
                .map_err(|source| SessionError::Start {
                    inst_id: instance.info.inst_id.clone(),
                    source,
                })?;
        }
        debug!(target: "srd", "Session started with {} instances.", self.instances.len());
        self.started = true;
        Ok(())
    }

    /// Feed samples `[start, end)` to every instance that is not stacked.
    /// Output is delivered before this returns.
    pub fn send(
        &mut self,
        start: u64,
        end: u64,
        data: &[u8],
        unit_size: usize,
    ) -> Result<(), SessionError> {
        if !self.started {
            return Err(SessionError::NotStarted);
        }
        if unit_size == 0 {
            return Err(SessionError::InvalidUnitSize(unit_size));
        }
        let bottom: Vec<usize> = self
            .instances
            .iter_enumerated()
            .filter(|(_, i)| i.info.parent.is_none())
            .map(|(id, _)| id.0)
            .collect();
        for index in bottom {
            run_instance(
                &mut self.instances.raw,
                index,
                0,
                &mut self.callbacks,
                Input::Samples {
                    start,
                    end,
                    unit_size,
                    data,
                },
            );
        }
        Ok(())
    }

    pub fn instance(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.get(id)
    }

    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.iter()
    }
}

impl Default for Session<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        debug!(target: "srd", "Destroying session ({} instances).", self.instances.len());
    }
}
