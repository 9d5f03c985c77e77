use capture::{Capture, Packet};
use log::{debug, error};

use crate::{engine::Session, error::RunError};

/// Something that replays a capture as a stream of packets, one at a time,
/// waiting for each to be handled before producing the next.
pub trait ReplaySource {
    fn replay(
        &mut self,
        handler: &mut dyn FnMut(Packet<'_>) -> Result<(), RunError>,
    ) -> Result<(), RunError>;
}

impl ReplaySource for Capture {
    fn replay(
        &mut self,
        handler: &mut dyn FnMut(Packet<'_>) -> Result<(), RunError>,
    ) -> Result<(), RunError> {
        debug!(target: "sr", "Replaying {} samples.", self.num_samples());
        for packet in self.packets() {
            handler(packet)?;
        }
        Ok(())
    }
}

/// Feeds replayed packets into a decode session, keeping track of the
/// absolute sample number.
pub struct AcquisitionFeed<'s, 'cb> {
    session: &'s mut Session<'cb>,
    sample_cursor: u64,
    seen_header: bool,
}

impl<'s, 'cb> AcquisitionFeed<'s, 'cb> {
    pub fn new(session: &'s mut Session<'cb>) -> Self {
        Self {
            session,
            sample_cursor: 0,
            seen_header: false,
        }
    }

    /// Number of samples sent so far; also the index of the next one.
    pub fn sample_cursor(&self) -> u64 {
        self.sample_cursor
    }

    pub fn handle(&mut self, packet: Packet<'_>) -> Result<(), RunError> {
        match packet {
            Packet::Header(header) => {
                debug!("Received header");
                if self.seen_header {
                    return Err(RunError::acquisition("Received a second header"));
                }
                self.seen_header = true;
                let samplerate = header
                    .samplerate
                    .ok_or_else(|| RunError::acquisition("Getting samplerate failed"))?;
                self.session.set_samplerate(samplerate).map_err(|e| {
                    RunError::acquisition(format!("Setting samplerate failed: {e}"))
                })?;
                self.session
                    .start()
                    .map_err(|e| RunError::acquisition(format!("Session start failed: {e}")))?;
            }
            Packet::Logic(logic) => {
                let num_samples = logic.num_samples();
                debug!("Received logic: {num_samples} samples");
                let end = self.sample_cursor + num_samples;
                if let Err(e) =
                    self.session
                        .send(self.sample_cursor, end, logic.data, logic.unit_size)
                {
                    // Only a missing header gets here; nothing can be decoded.
                    error!("Sending samples {}-{} failed: {e}", self.sample_cursor, end);
                    return Err(RunError::acquisition(format!("Sending samples failed: {e}")));
                }
                self.sample_cursor = end;
            }
            Packet::End => {
                debug!("Received end");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::{Decoder, DecoderDefinition, Options, Output, Samples};
    use capture::{Header, Logic};
    use std::{cell::RefCell, rc::Rc};

    struct Recorder(Rc<RefCell<Vec<(u64, u64, usize)>>>);

    impl Decoder for Recorder {
        fn decode(&mut self, samples: &Samples<'_>, _out: &mut Output<'_, '_>) -> anyhow::Result<()> {
            self.0
                .borrow_mut()
                .push((samples.start(), samples.end(), samples.unit_size()));
            Ok(())
        }
    }

    fn header(samplerate: Option<u64>) -> Header {
        Header {
            samplerate,
            unit_size: 2,
            channels: Vec::new(),
        }
    }

    #[test]
    fn test_sample_cursor() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let c = calls.clone();
        let def = DecoderDefinition::new("rec", move |_| Ok(Box::new(Recorder(c.clone()))));

        let mut session = Session::new();
        session.new_instance(Rc::new(def), &Options::default()).unwrap();

        let h = header(Some(8000));
        let mut feed = AcquisitionFeed::new(&mut session);
        feed.handle(Packet::Header(&h)).unwrap();
        feed.handle(Packet::Logic(Logic { unit_size: 2, data: &[0; 8] })).unwrap();
        feed.handle(Packet::Logic(Logic { unit_size: 2, data: &[0; 6] })).unwrap();
        feed.handle(Packet::End).unwrap();
        assert_eq!(feed.sample_cursor(), 7);
        assert_eq!(session.samplerate(), Some(8000));

        assert_eq!(*calls.borrow(), [(0, 4, 2), (4, 7, 2)]);
    }

    #[test]
    fn test_missing_samplerate() {
        let mut session = Session::new();
        let h = header(None);
        let mut feed = AcquisitionFeed::new(&mut session);
        let err = feed.handle(Packet::Header(&h)).unwrap_err();
        assert!(matches!(err, RunError::Acquisition(_)));
        assert!(!session.is_started());
    }

    #[test]
    fn test_logic_before_header() {
        let mut session = Session::new();
        let mut feed = AcquisitionFeed::new(&mut session);
        let err = feed
            .handle(Packet::Logic(Logic { unit_size: 1, data: &[1] }))
            .unwrap_err();
        assert!(matches!(err, RunError::Acquisition(_)));
        assert_eq!(feed.sample_cursor(), 0);
    }

    #[test]
    fn test_second_header() {
        let mut session = Session::new();
        let h = header(Some(1));
        let mut feed = AcquisitionFeed::new(&mut session);
        feed.handle(Packet::Header(&h)).unwrap();
        assert!(feed.handle(Packet::Header(&h)).is_err());
    }
}
