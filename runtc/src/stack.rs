use log::debug;

use crate::{
    channels::ChannelMap,
    engine::{InstanceId, Registry, Session, SessionError},
    error::RunError,
    testcase::DecoderSpec,
};

/// The instances built for a pipeline definition, bottom first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecoderStack {
    pub instances: Vec<InstanceId>,
}

impl DecoderStack {
    /// The instance that consumes samples.
    pub fn bottom(&self) -> InstanceId {
        self.instances[0]
    }

    /// The instance nothing is stacked on.
    pub fn top(&self) -> InstanceId {
        self.instances[self.instances.len() - 1]
    }
}

/// Instantiate every decoder spec in order and stack each instance on the one
/// before it.
pub fn build_stack(
    registry: &Registry,
    session: &mut Session<'_>,
    specs: &[DecoderSpec],
) -> Result<DecoderStack, RunError> {
    if specs.is_empty() {
        return Err(RunError::config("No protocol decoder specified."));
    }

    let mut instances: Vec<InstanceId> = Vec::with_capacity(specs.len());
    for spec in specs {
        let decoder = registry.load(&spec.id)?;

        let options = decoder
            .resolve_options(spec.options.iter().map(|o| (o.key.as_str(), &o.value)))
            .map_err(RunError::Configuration)?;
        let id = session
            .new_instance(decoder, &options)
            .map_err(|e| RunError::config(e.to_string()))?;

        if !spec.channels.is_empty() {
            let map = ChannelMap::resolve(&spec.channels)?;
            session.bind_channels(id, &map).map_err(|e| match e {
                SessionError::NoChannel { .. } => RunError::config(e.to_string()),
                e => RunError::config(format!("Failed to bind channels of {}: {e}", spec.id)),
            })?;
        }

        // Not the first decoder: it consumes the previous one's output.
        if let Some(&parent) = instances.last() {
            session
                .stack(parent, id)
                .map_err(|e| RunError::Stacking(e.to_string()))?;
        }
        debug!("Instantiated {} as {:?}", spec.id, id);
        instances.push(id);
    }

    Ok(DecoderStack { instances })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        engine::{Decoder, DecoderDefinition, OptionValue},
        testcase::{ChannelBinding, OptionBinding},
    };

    struct Nop;
    impl Decoder for Nop {}

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register(
            DecoderDefinition::new("spi", |_| Ok(Box::new(Nop)))
                .outputs(&["spi"])
                .channel("clk", "Clock")
                .optional_channel("mosi", "Data")
                .option("cpol", "Clock polarity", OptionValue::Int(0), &[]),
        );
        registry.register(
            DecoderDefinition::new("spiflash", |_| Ok(Box::new(Nop))).inputs(&["spi"]),
        );
        registry.register(DecoderDefinition::new("crc", |_| Ok(Box::new(Nop))).inputs(&["spi"]));
        registry
    }

    fn spi() -> DecoderSpec {
        DecoderSpec {
            id: "spi".into(),
            channels: vec![
                ChannelBinding { name: "clk".into(), index: 0 },
                ChannelBinding { name: "mosi".into(), index: 9 },
            ],
            options: vec![OptionBinding {
                key: "cpol".into(),
                value: OptionValue::Str("1".into()),
            }],
        }
    }

    #[test]
    fn test_stacking_order() {
        let registry = registry();
        let mut session = Session::new();
        let specs = [spi(), DecoderSpec::new("spiflash"), DecoderSpec::new("crc")];
        let stack = build_stack(&registry, &mut session, &specs).unwrap();

        assert_eq!(stack.instances.len(), 3);
        assert_eq!(stack.bottom(), InstanceId(0));
        assert_eq!(stack.top(), InstanceId(2));

        let parents: Vec<_> = stack
            .instances
            .iter()
            .map(|&id| session.instance(id).unwrap().info.parent)
            .collect();
        assert_eq!(parents, [None, Some(InstanceId(0)), Some(InstanceId(1))]);

        let bottom = &session.instance(stack.bottom()).unwrap().info;
        assert_eq!(bottom.channel_map, [Some(0), Some(9)]);
        assert_eq!(bottom.group_count, 2);
        assert_eq!(bottom.children, [InstanceId(1)]);
    }

    #[test]
    fn test_unknown_decoder() {
        let mut session = Session::new();
        let specs = [spi(), DecoderSpec::new("uart")];
        let err = build_stack(&registry(), &mut session, &specs).unwrap_err();
        assert!(matches!(err, RunError::DecoderNotFound(id) if id == "uart"));
    }

    #[test]
    fn test_unknown_channel() {
        let mut spec = spi();
        spec.channels.push(ChannelBinding { name: "miso".into(), index: 1 });
        let mut session = Session::new();
        let err = build_stack(&registry(), &mut session, &[spec]).unwrap_err();
        assert!(matches!(err, RunError::Configuration(_)));
    }

    #[test]
    fn test_bad_option() {
        let mut spec = spi();
        spec.options[0].value = OptionValue::Str("high".into());
        let mut session = Session::new();
        let err = build_stack(&registry(), &mut session, &[spec]).unwrap_err();
        assert!(matches!(err, RunError::Configuration(_)));
    }

    #[test]
    fn test_stack_after_start() {
        let registry = registry();
        let mut session = Session::new();
        session.set_samplerate(1000).unwrap();
        build_stack(&registry, &mut session, &[spi()]).unwrap();
        session.start().unwrap();
        // New instances cannot join a running session.
        let err = build_stack(&registry, &mut session, &[DecoderSpec::new("crc")]).unwrap_err();
        assert!(matches!(err, RunError::Configuration(_)));
    }
}
