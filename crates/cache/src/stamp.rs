//! Ticket stamp generation: `"%04x%08x%u"` built from a
//! process ID, a millisecond clock reading, and a local monotonic counter.
//!
//! Production code stamps tickets from the real process ID and wall clock;
//! tests want fixed `0x0123`/`0x456789AB` values so
//! that expected ticket strings are reproducible. Rather than a global test
//! flag, that choice is a small
//! trait implemented twice.

/// Supplies the two time/identity-varying halves of a ticket stamp.
pub trait StampSource {
    fn process_id(&self) -> u16;
    fn clock_ms(&self) -> u32;
}

/// Real process ID and wall-clock milliseconds.
#[derive(Debug, Default)]
pub struct SystemStampSource;

impl StampSource for SystemStampSource {
    fn process_id(&self) -> u16 {
        std::process::id() as u16
    }

    fn clock_ms(&self) -> u32 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u32)
            .unwrap_or(0)
    }
}

/// Fixed values for reproducible test output (a predictable
/// mode for tests that substitutes `0x0123` and `0x456789AB`).
#[derive(Debug, Default)]
pub struct DeterministicStampSource;

impl StampSource for DeterministicStampSource {
    fn process_id(&self) -> u16 {
        0x0123
    }

    fn clock_ms(&self) -> u32 {
        0x456789AB
    }
}

pub(crate) fn format_ticket(process_id: u16, clock_ms: u32, counter: u32) -> String {
    format!("{:04x}{:08x}{}", process_id, clock_ms, counter)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn deterministic_ticket_matches_spec_example() {
        let source = DeterministicStampSource::default();
        let ticket = format_ticket(source.process_id(), source.clock_ms(), 0);
        assert_eq!(ticket, "0123456789ab0");
    }

    #[test]
    fn counter_is_the_only_varying_suffix_within_one_millisecond() {
        let source = DeterministicStampSource::default();
        let a = format_ticket(source.process_id(), source.clock_ms(), 5);
        let b = format_ticket(source.process_id(), source.clock_ms(), 6);
        assert_ne!(a, b);
        assert!(a.starts_with("0123456789ab"));
        assert!(b.starts_with("0123456789ab"));
    }
}
