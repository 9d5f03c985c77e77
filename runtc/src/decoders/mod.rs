//! Decoders bundled with the driver.

mod logic;
mod tally;

use crate::engine::Registry;

pub fn register_all(registry: &mut Registry) {
    registry.register(logic::definition());
    registry.register(tally::definition());
}
