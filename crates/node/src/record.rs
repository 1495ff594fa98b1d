//! Log schema and the per-cycle measurement record.

/// One logged quantity: the column heading used in the log file and the
/// short key used on the telemetry wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub heading: String,
    pub key: String,
}

impl Field {
    pub fn new(heading: &str, key: &str) -> Self {
        Self {
            heading: heading.into(),
            key: key.into(),
        }
    }
}

pub const MOISTURE: &str = "Moisture [%]";
pub const PUMP: &str = "Pump Run [seconds]";
pub const VOLTAGE: &str = "Supply Voltage [V]";
pub const LIGHT: &str = "Light [lux]";
pub const TEMPERATURE: &str = "Temperature [deg C]";
pub const PRESSURE: &str = "Pressure [Pa]";
pub const HUMIDITY: &str = "Humidity [RH]";
pub const AQI: &str = "Air Quality [AQI]";
pub const TVOC: &str = "TVOC";
pub const ECO2: &str = "eCO2";
pub const DISTANCE: &str = "distance [mm]";

/// Ordered field list every record must supply. Headings never contain the
/// log separator or a newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// Build a schema, rejecting headings that would break the log format
    /// and duplicate headings or keys.
    pub fn new(fields: Vec<Field>) -> anyhow::Result<Self> {
        for (i, f) in fields.iter().enumerate() {
            anyhow::ensure!(
                !f.heading.is_empty() && !f.heading.contains([',', '\n', '\r']),
                "schema heading {:?} is empty or contains a separator",
                f.heading
            );
            anyhow::ensure!(
                !f.key.is_empty() && !f.key.contains(['\n', '\r']),
                "schema key {:?} is empty or contains a newline",
                f.key
            );
            anyhow::ensure!(
                !fields[..i]
                    .iter()
                    .any(|g| g.heading == f.heading || g.key == f.key),
                "duplicate schema field {:?}",
                f.heading
            );
        }
        Ok(Self { fields })
    }

    /// The node's standard column set.
    pub fn standard() -> Self {
        Self {
            fields: vec![
                Field::new(MOISTURE, "moisture"),
                Field::new(PUMP, "pump"),
                Field::new(VOLTAGE, "voltage"),
                Field::new(LIGHT, "lux"),
                Field::new(TEMPERATURE, "temp"),
                Field::new(PRESSURE, "pressure"),
                Field::new(HUMIDITY, "humidity"),
                Field::new(AQI, "aqi"),
                Field::new(TVOC, "tvoc"),
                Field::new(ECO2, "eco2"),
                Field::new(DISTANCE, "dist"),
            ],
        }
    }

    /// Standard fields selected by key, in the order given.
    pub fn from_keys<S: AsRef<str>>(keys: &[S]) -> anyhow::Result<Self> {
        let standard = Self::standard();
        let fields = keys
            .iter()
            .map(|k| {
                let k = k.as_ref();
                standard
                    .fields
                    .iter()
                    .find(|f| f.key == k)
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("unknown column {k:?}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        anyhow::ensure!(!fields.is_empty(), "no columns selected");
        Self::new(fields)
    }

    /// Keys of the standard column set, in order.
    pub fn standard_keys() -> Vec<String> {
        Self::standard().fields.into_iter().map(|f| f.key).collect()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn contains(&self, heading: &str) -> bool {
        self.fields.iter().any(|f| f.heading == heading)
    }
}

/// Named values for one cycle, in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleRecord {
    values: Vec<(String, f64)>,
}

impl CycleRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `heading` to `value`, replacing any earlier value.
    pub fn insert(&mut self, heading: &str, value: f64) {
        match self.values.iter_mut().find(|(h, _)| h == heading) {
            Some(slot) => slot.1 = value,
            None => self.values.push((heading.to_string(), value)),
        }
    }

    /// Same as [`insert`](Self::insert) but substitutes `0` for NaN, the
    /// value used for sensors that are absent or failed to read.
    pub fn insert_or_zero(&mut self, heading: &str, value: f64) {
        self.insert(heading, if value.is_nan() { 0.0 } else { value });
    }

    pub fn get(&self, heading: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(h, _)| h == heading)
            .map(|(_, v)| *v)
    }

    pub fn headings(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(h, _)| h.as_str())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
