use serde::{Deserialize, Serialize};

/// Cómo se combina el resultado final de un job.
///
/// Los workers siempre suman; en modo `Average` el master divide el
/// resultado final por la cantidad de inputs originales.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMode {
    #[default]
    Sum,
    Average,
}

impl AggregationMode {
    pub fn divisor(self, total_inputs: usize) -> f64 {
        match self {
            AggregationMode::Sum => 1.0,
            AggregationMode::Average => total_inputs.max(1) as f64,
        }
    }
}

/// Divide cada celda numérica de un CSV (con encabezado) por `divisor`.
/// Las celdas no numéricas quedan igual.
pub fn scale_csv(data: &[u8], divisor: f64) -> Result<Vec<u8>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(data);
    let mut writer = csv::Writer::from_writer(Vec::new());

    let headers = reader.headers()?.clone();
    writer.write_record(&headers)?;

    for record in reader.records() {
        let record = record?;
        let scaled: Vec<String> = record
            .iter()
            .map(|field| match field.trim().parse::<f64>() {
                Ok(value) => (value / divisor).to_string(),
                Err(_) => field.to_string(),
            })
            .collect();
        writer.write_record(&scaled)?;
    }

    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}
