use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::labels::LabelMap;

/// Export format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ExportFormat::Json,
            _ => ExportFormat::Csv,
        }
    }
}

/// Classification outcome for one image
#[derive(Debug, Clone, Serialize)]
pub struct ImagePrediction {
    pub path: String,
    pub top_label: Option<String>,
    pub top_probability: Option<f32>,
    pub probabilities: BTreeMap<String, f32>,
    pub error: Option<String>,
}

impl ImagePrediction {
    pub fn from_probs(path: &Path, labels: &LabelMap, probs: &[f32]) -> Self {
        let top = labels.argmax(probs);
        Self {
            path: path.display().to_string(),
            top_label: top.map(|(label, _)| label.to_string()),
            top_probability: top.map(|(_, p)| p),
            probabilities: labels
                .ranked(probs)
                .into_iter()
                .map(|(label, p)| (label.to_string(), p))
                .collect(),
            error: None,
        }
    }

    pub fn failed(path: &Path, error: impl std::fmt::Display) -> Self {
        Self {
            path: path.display().to_string(),
            top_label: None,
            top_probability: None,
            probabilities: BTreeMap::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Export predictions to a file, picking the format from its extension
pub fn export_predictions(
    predictions: &[ImagePrediction],
    labels: &LabelMap,
    output_path: &Path,
) -> Result<usize> {
    let file = File::create(output_path)?;

    match ExportFormat::from_path(output_path) {
        ExportFormat::Json => write_json(predictions, file)?,
        ExportFormat::Csv => write_csv(predictions, labels, file)?,
    }

    Ok(predictions.len())
}

pub fn write_json(predictions: &[ImagePrediction], mut writer: impl Write) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, predictions)?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// One row per image, one probability column per label in index order
pub fn write_csv(predictions: &[ImagePrediction], labels: &LabelMap, writer: impl Write) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    let label_names: Vec<&String> = labels.num2text().values().collect();

    let mut header = vec!["path".to_string(), "top_label".to_string()];
    header.extend(label_names.iter().map(|l| l.to_string()));
    header.push("error".to_string());
    wtr.write_record(&header)?;

    for prediction in predictions {
        let mut record = vec![
            prediction.path.clone(),
            prediction.top_label.clone().unwrap_or_default(),
        ];
        record.extend(label_names.iter().map(|label| {
            prediction
                .probabilities
                .get(*label)
                .map(|p| format!("{:.6}", p))
                .unwrap_or_default()
        }));
        record.push(prediction.error.clone().unwrap_or_default());
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}
