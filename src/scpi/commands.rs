//! Static SCPI command vocabulary.
//!
//! Every operation the driver can perform is one entry here: a logical name, a
//! template with `{}` slots, the kind of value each slot takes and the shape of
//! the reply. The transaction engine reads the reply shape from the entry and
//! never inspects reply content to decide it.

use crate::error::ScopeError;
use crate::types::Arg;

/// Placeholder for one positional argument in a template.
pub const SLOT: &str = "{}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyShape {
    /// Write-only command, nothing is read back
    None,
    SingleLine,
    BinaryBlock,
}

/// Value kind accepted by a template slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Int,
    /// Accepts integers as well
    Float,
    Word,
}

impl SlotKind {
    fn accepts(self, arg: &Arg) -> bool {
        matches!(
            (self, arg),
            (SlotKind::Int, Arg::Int(_))
                | (SlotKind::Float, Arg::Float(_) | Arg::Int(_))
                | (SlotKind::Word, Arg::Word(_))
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub name: &'static str,
    pub template: &'static str,
    pub slots: &'static [SlotKind],
    pub reply: ReplyShape,
}

impl Command {
    pub fn is_query(&self) -> bool {
        self.reply != ReplyShape::None
    }

    /// Number of `{}` slots in the template.
    pub fn slot_count(&self) -> usize {
        self.template.matches(SLOT).count()
    }

    /// Substitute `args` into the template.
    ///
    /// Fails before any I/O when the argument count or kinds do not match the slots.
    pub fn render(&self, args: &[Arg]) -> Result<String, ScopeError> {
        if args.len() != self.slots.len() {
            return Err(ScopeError::malformed(
                self.name,
                format!(
                    "'{}' takes {} argument(s), got {}",
                    self.template,
                    self.slots.len(),
                    args.len()
                ),
                &[],
            ));
        }

        if let Some((position, (kind, arg))) = self
            .slots
            .iter()
            .zip(args)
            .enumerate()
            .find(|(_, (kind, arg))| !kind.accepts(arg))
        {
            return Err(ScopeError::malformed(
                self.name,
                format!("argument {position} of '{}' must be {kind:?}, got {arg:?}", self.template),
                &[],
            ));
        }

        if args
            .iter()
            .any(|arg| matches!(arg, Arg::Word(w) if w.contains(['\n', '\r', ';'])))
        {
            return Err(ScopeError::malformed(
                self.name,
                "word arguments must not contain terminators or ';'",
                &[],
            ));
        }

        let mut rendered = String::with_capacity(self.template.len() + 16);
        let mut pieces = self.template.split(SLOT);
        if let Some(first) = pieces.next() {
            rendered.push_str(first);
        }
        for (piece, arg) in pieces.zip(args) {
            rendered.push_str(&arg.to_string());
            rendered.push_str(piece);
        }
        Ok(rendered)
    }
}

use ReplyShape::{BinaryBlock, None as Write, SingleLine as Line};
use SlotKind::{Float, Int, Word};

const fn cmd(
    name: &'static str,
    template: &'static str,
    slots: &'static [SlotKind],
    reply: ReplyShape,
) -> Command {
    Command {
        name,
        template,
        slots,
        reply,
    }
}

pub static VOCABULARY: &[Command] = &[
    // IEEE 488.2 common commands and system
    cmd("identity", "*IDN?", &[], Line),
    cmd("reset", "*RST", &[], Write),
    cmd("clear_status", "*CLS", &[], Write),
    cmd("operation_complete", "*OPC?", &[], Line),
    cmd("self_test", "*TST?", &[], Line),
    cmd("error_query", "SYST:ERR?", &[], Line),
    // Run control
    cmd("run", "RUN", &[], Write),
    cmd("stop", "STOP", &[], Write),
    cmd("single", "SING", &[], Write),
    cmd("force_trigger", "TFOR", &[], Write),
    // Channels
    cmd("channel_display", "CHAN{}:DISP {}", &[Int, Word], Write),
    cmd("channel_display_query", "CHAN{}:DISP?", &[Int], Line),
    cmd("channel_coupling", "CHAN{}:COUP {}", &[Int, Word], Write),
    cmd("channel_coupling_query", "CHAN{}:COUP?", &[Int], Line),
    cmd("channel_scale", "CHAN{}:SCAL {}", &[Int, Float], Write),
    cmd("channel_scale_query", "CHAN{}:SCAL?", &[Int], Line),
    cmd("channel_offset", "CHAN{}:OFFS {}", &[Int, Float], Write),
    cmd("channel_offset_query", "CHAN{}:OFFS?", &[Int], Line),
    cmd("channel_probe", "CHAN{}:PROB {}", &[Int, Float], Write),
    cmd("channel_probe_query", "CHAN{}:PROB?", &[Int], Line),
    cmd("channel_bandwidth", "CHAN{}:BWL {}", &[Int, Word], Write),
    // Timebase
    cmd("timebase_scale", "TIM:SCAL {}", &[Float], Write),
    cmd("timebase_scale_query", "TIM:SCAL?", &[], Line),
    cmd("timebase_offset", "TIM:OFFS {}", &[Float], Write),
    cmd("timebase_offset_query", "TIM:OFFS?", &[], Line),
    cmd("timebase_mode", "TIM:MODE {}", &[Word], Write),
    cmd("timebase_mode_query", "TIM:MODE?", &[], Line),
    // Trigger
    cmd("trigger_mode", "TRIG:MODE {}", &[Word], Write),
    cmd("trigger_coupling", "TRIG:COUP {}", &[Word], Write),
    cmd("trigger_holdoff", "TRIG:HOLD {}", &[Float], Write),
    cmd("trigger_status", "TRIG:STAT?", &[], Line),
    cmd("trigger_edge_source", "TRIG:EDGE:SOUR {}", &[Word], Write),
    cmd("trigger_edge_source_query", "TRIG:EDGE:SOUR?", &[], Line),
    cmd("trigger_edge_level", "TRIG:EDGE:LEV {}", &[Float], Write),
    cmd("trigger_edge_level_query", "TRIG:EDGE:LEV?", &[], Line),
    cmd("trigger_edge_slope", "TRIG:EDGE:SLOP {}", &[Word], Write),
    cmd("trigger_edge_slope_query", "TRIG:EDGE:SLOP?", &[], Line),
    // Acquisition
    cmd("acquire_type", "ACQ:TYPE {}", &[Word], Write),
    cmd("acquire_type_query", "ACQ:TYPE?", &[], Line),
    cmd("acquire_averages", "ACQ:AVER {}", &[Int], Write),
    cmd("acquire_memory_depth", "ACQ:MDEP {}", &[Word], Write),
    cmd("acquire_memory_depth_query", "ACQ:MDEP?", &[], Line),
    // Waveform transfer
    cmd("waveform_source", "WAV:SOUR {}", &[Word], Write),
    cmd("waveform_mode", "WAV:MODE {}", &[Word], Write),
    cmd("waveform_format", "WAV:FORM {}", &[Word], Write),
    cmd("waveform_start", "WAV:STAR {}", &[Int], Write),
    cmd("waveform_stop", "WAV:STOP {}", &[Int], Write),
    cmd("waveform_preamble", "WAV:PRE?", &[], Line),
    cmd("waveform_data", "WAV:DATA?", &[], BinaryBlock),
    // Measurements
    cmd("measure_item", "MEAS:ITEM? {},CHAN{}", &[Word, Int], Line),
    cmd("measure_clear", "MEAS:CLE ALL", &[], Write),
    // Display
    cmd("display_clear", "DISP:CLE", &[], Write),
    cmd("display_data", "DISP:DATA?", &[], BinaryBlock),
];

/// Find a vocabulary entry by logical name.
pub fn lookup(name: &str) -> Result<&'static Command, ScopeError> {
    VOCABULARY
        .iter()
        .find(|command| command.name == name)
        .ok_or_else(|| ScopeError::UnknownOperation(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_entry_declares_its_slots() {
        for command in VOCABULARY {
            assert_eq!(
                command.slot_count(),
                command.slots.len(),
                "slot mismatch in {}",
                command.name
            );
        }
    }

    #[test]
    fn test_names_are_unique() {
        let names: HashSet<_> = VOCABULARY.iter().map(|c| c.name).collect();
        assert_eq!(names.len(), VOCABULARY.len());
    }

    #[test]
    fn test_query_templates_agree_with_reply_shape() {
        for command in VOCABULARY {
            let head = command.template.split(' ').next().unwrap_or_default();
            assert_eq!(
                head.ends_with('?'),
                command.is_query(),
                "{} declares the wrong reply shape",
                command.name
            );
        }
    }

    #[test]
    fn test_lookup_unknown() {
        assert!(matches!(
            lookup("channel_colour"),
            Err(ScopeError::UnknownOperation(name)) if name == "channel_colour"
        ));
    }

    #[test]
    fn test_render_substitutes_in_order() {
        let command = lookup("channel_scale").unwrap();
        let line = command.render(&[Arg::Int(2), Arg::Float(0.5)]).unwrap();
        assert_eq!(line, "CHAN2:SCAL 0.5");

        let command = lookup("measure_item").unwrap();
        let line = command.render(&["VPP".into(), Arg::Int(1)]).unwrap();
        assert_eq!(line, "MEAS:ITEM? VPP,CHAN1");
    }

    #[test]
    fn test_render_float_slot_accepts_int() {
        let command = lookup("timebase_scale").unwrap();
        assert_eq!(command.render(&[Arg::Int(1)]).unwrap(), "TIM:SCAL 1");
    }

    #[test]
    fn test_render_rejects_count_mismatch() {
        let command = lookup("channel_scale").unwrap();
        assert!(matches!(
            command.render(&[Arg::Int(1)]),
            Err(ScopeError::MalformedReply { .. })
        ));
        assert!(matches!(
            lookup("identity").unwrap().render(&[Arg::Int(1)]),
            Err(ScopeError::MalformedReply { .. })
        ));
    }

    #[test]
    fn test_render_rejects_kind_mismatch() {
        let command = lookup("channel_coupling").unwrap();
        assert!(command.render(&[Arg::Int(1), Arg::Float(1.0)]).is_err());
        assert!(command.render(&["CHAN1".into(), "DC".into()]).is_err());
    }

    #[test]
    fn test_render_rejects_injected_commands() {
        let command = lookup("waveform_source").unwrap();
        assert!(command.render(&["CHAN1;*RST".into()]).is_err());
        assert!(command.render(&["CHAN1\n*RST".into()]).is_err());
    }
}
