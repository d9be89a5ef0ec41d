//! Sensor report parsing.
//!
//! The only response the controller produces is the sensor report:
//!
//! ```text
//! Temp:30.1°C, Humidity:45.2%, TDS:120ppm, PH:7.2
//! ```
//!
//! Unit suffixes are stripped, the line is split on `,` into `key:value`
//! pairs, and all four keys must be present with numeric values.

use crate::error::{ProtocolError, ProtocolResult};

/// Prefix every sensor report starts with.
pub const SENSOR_LINE_PREFIX: &str = "Temp:";

/// Unit suffixes the controller appends to values.
const UNIT_SUFFIXES: &[&str] = &["°C", "%", "ppm"];

/// Separator between fields.
const FIELD_DELIMITER: char = ',';

/// Separator between a key and its value.
const KEY_VALUE_DELIMITER: char = ':';

const KEY_TEMPERATURE: &str = "Temp";
const KEY_HUMIDITY: &str = "Humidity";
const KEY_TDS: &str = "TDS";
const KEY_PH: &str = "PH";

/// One sensor report from the controller.
///
/// EC (electrical conductivity) is not part of the wire report; callers that
/// have it from elsewhere layer it on with [`SensorReading::with_ec`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SensorReading {
    /// Air temperature in °C.
    pub temperature: f64,
    /// Relative humidity in %.
    pub humidity: f64,
    /// Total dissolved solids in ppm.
    pub tds: f64,
    /// Nutrient solution pH.
    pub ph: f64,
    /// Electrical conductivity, when supplied by the caller.
    pub ec: Option<f64>,
}

impl SensorReading {
    /// Parse a sensor report line.
    ///
    /// Leading/trailing whitespace and line terminators are ignored. Keys
    /// other than the four known ones are ignored as well.
    pub fn parse(line: &str) -> ProtocolResult<SensorReading> {
        let line = line.trim();
        if !line.starts_with(SENSOR_LINE_PREFIX) {
            return Err(ProtocolError::NotSensorLine(line.to_string()));
        }

        let mut stripped = line.to_string();
        for suffix in UNIT_SUFFIXES {
            stripped = stripped.replace(suffix, "");
        }

        let mut temperature = None;
        let mut humidity = None;
        let mut tds = None;
        let mut ph = None;

        for part in stripped.split(FIELD_DELIMITER) {
            let Some((key, value)) = part.split_once(KEY_VALUE_DELIMITER) else {
                continue;
            };
            let slot = match key.trim() {
                KEY_TEMPERATURE => &mut temperature,
                KEY_HUMIDITY => &mut humidity,
                KEY_TDS => &mut tds,
                KEY_PH => &mut ph,
                _ => continue,
            };
            *slot = Some(value.trim());
        }

        Ok(SensorReading {
            temperature: Self::field(KEY_TEMPERATURE, temperature)?,
            humidity: Self::field(KEY_HUMIDITY, humidity)?,
            tds: Self::field(KEY_TDS, tds)?,
            ph: Self::field(KEY_PH, ph)?,
            ec: None,
        })
    }

    fn field(name: &'static str, raw: Option<&str>) -> ProtocolResult<f64> {
        let raw = raw.ok_or(ProtocolError::MissingField(name))?;
        raw.parse::<f64>().map_err(|_| ProtocolError::InvalidValue {
            field: name,
            value: raw.to_string(),
        })
    }

    /// Return a copy of this reading with an externally supplied EC value.
    pub fn with_ec(mut self, ec: f64) -> Self {
        self.ec = Some(ec);
        self
    }

    /// Format the reading the way the controller prints it (EC is not part of the report).
    pub fn to_report_line(&self) -> String {
        format!(
            "Temp:{}°C, Humidity:{}%, TDS:{}ppm, PH:{}",
            self.temperature, self.humidity, self.tds, self.ph
        )
    }
}

impl std::fmt::Display for SensorReading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "temp={:.1}°C humidity={:.1}% tds={:.0}ppm ph={:.2}",
            self.temperature, self.humidity, self.tds, self.ph
        )?;
        if let Some(ec) = self.ec {
            write!(f, " ec={ec:.2}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_parse_full_report() {
        let reading =
            SensorReading::parse("Temp:25.3°C, Humidity:60.1%, TDS:450ppm, PH:6.8").unwrap();
        assert_relative_eq!(reading.temperature, 25.3);
        assert_relative_eq!(reading.humidity, 60.1);
        assert_relative_eq!(reading.tds, 450.0);
        assert_relative_eq!(reading.ph, 6.8);
        assert_eq!(reading.ec, None);
    }

    #[test]
    fn test_parse_tolerates_terminators_and_spacing() {
        let line = "Temp: 30.1°C ,Humidity: 45.2% , TDS:120ppm,PH:7.2\r\n";
        let reading = SensorReading::parse(line).unwrap();
        assert_relative_eq!(reading.temperature, 30.1);
        assert_relative_eq!(reading.ph, 7.2);
    }

    #[test]
    fn test_parse_ignores_unknown_keys() {
        let line = "Temp:20°C, Humidity:50%, TDS:300ppm, PH:6.5, EC:1.4";
        let reading = SensorReading::parse(line).unwrap();
        assert_relative_eq!(reading.tds, 300.0);
        assert_eq!(reading.ec, None);
    }

    #[test]
    fn test_missing_ph() {
        assert_eq!(
            SensorReading::parse("Temp:25.3°C, Humidity:60.1%, TDS:450ppm"),
            Err(ProtocolError::MissingField("PH"))
        );
    }

    #[test]
    fn test_invalid_value() {
        assert_eq!(
            SensorReading::parse("Temp:abc°C, Humidity:60.1%, TDS:450ppm, PH:6.8"),
            Err(ProtocolError::InvalidValue { field: "Temp", value: "abc".to_string() })
        );
    }

    #[test]
    fn test_not_sensor_line() {
        assert!(matches!(
            SensorReading::parse("Arduino ready"),
            Err(ProtocolError::NotSensorLine(_))
        ));
        // The prefix is case-sensitive, as the controller prints it.
        assert!(matches!(
            SensorReading::parse("temp:25°C, Humidity:60%, TDS:450ppm, PH:6.8"),
            Err(ProtocolError::NotSensorLine(_))
        ));
    }

    #[test]
    fn test_with_ec() {
        let reading = SensorReading::parse("Temp:25°C, Humidity:60%, TDS:450ppm, PH:6.8")
            .unwrap()
            .with_ec(1.25);
        assert_eq!(reading.ec, Some(1.25));
        assert!(reading.to_string().ends_with("ec=1.25"));
    }

    #[test]
    fn test_report_line_parses_back() {
        let reading = SensorReading {
            temperature: 21.5,
            humidity: 55.0,
            tds: 410.0,
            ph: 6.1,
            ec: None,
        };
        assert_eq!(reading.to_report_line(), "Temp:21.5°C, Humidity:55%, TDS:410ppm, PH:6.1");
        assert_eq!(SensorReading::parse(&reading.to_report_line()), Ok(reading));
    }
}
