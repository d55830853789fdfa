use log::debug;
use serde::Serialize;

use super::ScopeClient;
use crate::error::ScopeError;
use crate::types::{Channel, MeasurementType};

/// Reply the instrument gives when a measurement cannot be taken on the current signal.
const INVALID_MEASUREMENT: f64 = 9.9e37;

/// Common voltage measurements of one channel. An item the instrument could
/// not measure is `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VoltageMeasurements {
    pub vpp: Option<f64>,
    pub vmax: Option<f64>,
    pub vmin: Option<f64>,
    pub vrms: Option<f64>,
    pub vavg: Option<f64>,
}

/// Common timing measurements of one channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimeMeasurements {
    pub frequency: Option<f64>,
    pub period: Option<f64>,
    pub rise_time: Option<f64>,
    pub fall_time: Option<f64>,
    pub pulse_width: Option<f64>,
}

impl ScopeClient {
    /// Take one automatic measurement.
    ///
    /// The instrument answers `9.9E37` when the item is not measurable; that is
    /// reported as a malformed reply so it never passes for a real value.
    pub fn measure(&self, item: MeasurementType, channel: Channel) -> Result<f64, ScopeError> {
        let value = self.query_f64("measure_item", &[item.mnemonic().into(), channel.into()])?;
        if !value.is_finite() || value.abs() >= INVALID_MEASUREMENT {
            return Err(ScopeError::malformed(
                "MEAS:ITEM?",
                format!("{} on {} is not measurable", item.mnemonic(), channel.mnemonic()),
                value.to_string().as_bytes(),
            ));
        }
        Ok(value)
    }

    /// Like [`ScopeClient::measure`], but an unmeasurable or unparsable value is `None`.
    /// Link errors are still returned.
    pub fn try_measure(
        &self,
        item: MeasurementType,
        channel: Channel,
    ) -> Result<Option<f64>, ScopeError> {
        match self.measure(item, channel) {
            Ok(value) => Ok(Some(value)),
            Err(e @ ScopeError::MalformedReply { .. }) => {
                debug!("{} on {}: {e}", item.mnemonic(), channel.mnemonic());
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub fn voltage_measurements(&self, channel: Channel) -> Result<VoltageMeasurements, ScopeError> {
        Ok(VoltageMeasurements {
            vpp: self.try_measure(MeasurementType::VoltagePeakToPeak, channel)?,
            vmax: self.try_measure(MeasurementType::VoltageMax, channel)?,
            vmin: self.try_measure(MeasurementType::VoltageMin, channel)?,
            vrms: self.try_measure(MeasurementType::VoltageRms, channel)?,
            vavg: self.try_measure(MeasurementType::VoltageAverage, channel)?,
        })
    }

    pub fn time_measurements(&self, channel: Channel) -> Result<TimeMeasurements, ScopeError> {
        Ok(TimeMeasurements {
            frequency: self.try_measure(MeasurementType::Frequency, channel)?,
            period: self.try_measure(MeasurementType::Period, channel)?,
            rise_time: self.try_measure(MeasurementType::RiseTime, channel)?,
            fall_time: self.try_measure(MeasurementType::FallTime, channel)?,
            pulse_width: self.try_measure(MeasurementType::PositiveWidth, channel)?,
        })
    }

    pub fn clear_measurements(&self) -> Result<(), ScopeError> {
        self.send("measure_clear", &[])
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::client_with;
    use super::*;
    use crate::scpi::mock::MockTransport;

    #[test]
    fn test_measure_renders_item_and_channel() {
        let transport = MockTransport::with_responder(|line| {
            (line == "MEAS:ITEM? VPP,CHAN2").then(|| b"3.280000e+00\n".to_vec())
        });
        let client = client_with(transport);
        let value = client
            .measure(MeasurementType::VoltagePeakToPeak, Channel::new(2).unwrap())
            .unwrap();
        assert_eq!(value, 3.28);
    }

    #[test]
    fn test_unmeasurable_item_is_an_error() {
        let transport = MockTransport::with_input(b"9.9E37\n");
        let client = client_with(transport);
        assert!(matches!(
            client.measure(MeasurementType::Frequency, Channel::new(1).unwrap()),
            Err(ScopeError::MalformedReply { .. })
        ));
    }

    #[test]
    fn test_voltage_summary_marks_failed_items() {
        let transport = MockTransport::with_responder(|line| {
            let reply: &[u8] = match line {
                "MEAS:ITEM? VPP,CHAN1" => b"2.0\n",
                "MEAS:ITEM? VMAX,CHAN1" => b"1.0\n",
                "MEAS:ITEM? VMIN,CHAN1" => b"-1.0\n",
                "MEAS:ITEM? VRMS,CHAN1" => b"9.9E37\n",
                "MEAS:ITEM? VAVG,CHAN1" => b"****\n",
                _ => return None,
            };
            Some(reply.to_vec())
        });
        let client = client_with(transport);

        let summary = client.voltage_measurements(Channel::new(1).unwrap()).unwrap();
        assert_eq!(
            summary,
            VoltageMeasurements {
                vpp: Some(2.0),
                vmax: Some(1.0),
                vmin: Some(-1.0),
                vrms: None,
                vavg: None,
            }
        );
    }

    #[test]
    fn test_time_summary() {
        let transport = MockTransport::with_responder(|line| {
            let reply: &[u8] = match line {
                "MEAS:ITEM? FREQ,CHAN3" => b"1.000000e+03\n",
                "MEAS:ITEM? PER,CHAN3" => b"1.000000e-03\n",
                _ => b"garbage\n",
            };
            Some(reply.to_vec())
        });
        let client = client_with(transport);

        let summary = client.time_measurements(Channel::new(3).unwrap()).unwrap();
        assert_eq!(summary.frequency, Some(1000.0));
        assert_eq!(summary.period, Some(1e-3));
        assert_eq!(summary.rise_time, None);
        assert_eq!(summary.pulse_width, None);
    }

    #[test]
    fn test_summary_fails_on_dead_link() {
        let transport = MockTransport::with_responder(|line| {
            (line == "MEAS:ITEM? VPP,CHAN1").then(|| b"2.0\n".to_vec())
        });
        let client = client_with(transport);
        assert!(matches!(
            client.voltage_measurements(Channel::new(1).unwrap()),
            Err(ScopeError::LinkTimeout { .. })
        ));

        let client = client_with(MockTransport::new());
        client.close().unwrap();
        assert!(matches!(
            client.time_measurements(Channel::new(1).unwrap()),
            Err(ScopeError::LinkFailure { .. })
        ));
    }
}
