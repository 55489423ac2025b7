//! Export fitted light curves to CSV and JSON.
//!
//! - CSV is one cadence per row, meant for spreadsheets and plotting scripts.
//! - JSON is the portable record of a fit: the aligned series plus the
//!   holdout sections and per-section weights that produced them.
//!
//! Column and field names are stable; downstream tooling keys on them.

use std::fs::File;
use std::io::Write;
use std::ops::Range;
use std::path::Path;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::domain::LightCurveKind;
use crate::error::CpmError;
use crate::fit::PixelResult;
use crate::source::LightCurve;

/// Portable JSON form of an aperture light curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightCurveFile {
    pub kind: LightCurveKind,
    pub time: Vec<f64>,
    pub flux: Vec<f64>,
}

/// JSON record of one pixel fit. Blocks the model was fitted without
/// serialize as `null`.
#[derive(Debug, Serialize)]
struct PixelResultFile<'a> {
    time: &'a [f64],
    target_flux: &'a [f64],
    cpm_prediction: Option<&'a [f64]>,
    poly_prediction: Option<&'a [f64]>,
    combined_prediction: &'a [f64],
    cpm_subtracted_flux: Option<&'a [f64]>,
    residual: &'a [f64],
    sections: &'a [Range<usize>],
    block_labels: &'a [String],
    weights: Vec<Vec<f64>>,
}

/// Write an aperture light curve to a CSV file.
///
/// The flux column is named after `kind` so files for different light-curve
/// kinds stay distinguishable after download.
pub fn write_lightcurve_csv(
    path: &Path,
    lc: &LightCurve,
    kind: LightCurveKind,
) -> Result<(), CpmError> {
    if lc.time.len() != lc.flux.len() {
        return Err(CpmError::DataLoad(format!(
            "light curve has {} time samples but {} flux samples",
            lc.time.len(),
            lc.flux.len()
        )));
    }
    let mut file = File::create(path).map_err(|e| {
        CpmError::DataLoad(format!(
            "failed to create export CSV '{}': {e}",
            path.display()
        ))
    })?;

    // Header
    writeln!(file, "time,{}", kind.field_name())
        .map_err(|e| CpmError::DataLoad(format!("failed to write export CSV header: {e}")))?;

    for (t, f) in lc.time.iter().zip(&lc.flux) {
        writeln!(file, "{t:.10},{f:.6}")
            .map_err(|e| CpmError::DataLoad(format!("failed to write export CSV row: {e}")))?;
    }

    Ok(())
}

/// Write an aperture light curve to a JSON file.
pub fn write_lightcurve_json(
    path: &Path,
    lc: &LightCurve,
    kind: LightCurveKind,
) -> Result<(), CpmError> {
    let file = File::create(path).map_err(|e| {
        CpmError::DataLoad(format!(
            "failed to create light-curve JSON '{}': {e}",
            path.display()
        ))
    })?;

    let record = LightCurveFile {
        kind,
        time: lc.time.clone(),
        flux: lc.flux.clone(),
    };
    serde_json::to_writer_pretty(file, &record)
        .map_err(|e| CpmError::DataLoad(format!("failed to write light-curve JSON: {e}")))?;

    Ok(())
}

/// Read a light curve JSON file written by [`write_lightcurve_json`].
pub fn read_lightcurve_json(path: &Path) -> Result<LightCurveFile, CpmError> {
    let file = File::open(path).map_err(|e| {
        CpmError::DataLoad(format!(
            "failed to open light-curve JSON '{}': {e}",
            path.display()
        ))
    })?;
    let record: LightCurveFile = serde_json::from_reader(file).map_err(|e| {
        CpmError::DataLoad(format!(
            "invalid light-curve JSON '{}': {e}",
            path.display()
        ))
    })?;
    Ok(record)
}

/// Write every series of a pixel fit to a CSV file, one cadence per row.
///
/// Columns for blocks the model was fitted without are left empty.
pub fn write_pixel_result_csv(path: &Path, result: &PixelResult) -> Result<(), CpmError> {
    let mut file = File::create(path).map_err(|e| {
        CpmError::DataLoad(format!(
            "failed to create export CSV '{}': {e}",
            path.display()
        ))
    })?;

    // Header
    writeln!(
        file,
        "time,target_flux,cpm_prediction,poly_prediction,combined_prediction,cpm_subtracted_flux,residual"
    )
    .map_err(|e| CpmError::DataLoad(format!("failed to write export CSV header: {e}")))?;

    let optional =
        |values: Option<&DVector<f64>>, i: usize| values.map(|v| format!("{:.6}", v[i])).unwrap_or_default();

    for i in 0..result.time().len() {
        writeln!(
            file,
            "{:.10},{:.6},{},{},{:.6},{},{:.6}",
            result.time()[i],
            result.raw()[i],
            optional(result.cpm_prediction(), i),
            optional(result.poly_prediction(), i),
            result.combined_prediction()[i],
            optional(result.cpm_subtracted_flux(), i),
            result.residual()[i],
        )
        .map_err(|e| CpmError::DataLoad(format!("failed to write export CSV row: {e}")))?;
    }

    Ok(())
}

/// Write a pixel fit to a JSON file, including sections and weights.
pub fn write_pixel_result_json(path: &Path, result: &PixelResult) -> Result<(), CpmError> {
    let file = File::create(path).map_err(|e| {
        CpmError::DataLoad(format!(
            "failed to create pixel-result JSON '{}': {e}",
            path.display()
        ))
    })?;

    let record = PixelResultFile {
        time: result.time(),
        target_flux: result.raw().as_slice(),
        cpm_prediction: result.cpm_prediction().map(|v| v.as_slice()),
        poly_prediction: result.poly_prediction().map(|v| v.as_slice()),
        combined_prediction: result.combined_prediction().as_slice(),
        cpm_subtracted_flux: result.cpm_subtracted_flux().map(|v| v.as_slice()),
        residual: result.residual().as_slice(),
        sections: result.split().sections(),
        block_labels: result.block_labels(),
        weights: result
            .weights()
            .iter()
            .map(|w| w.as_slice().to_vec())
            .collect(),
    };
    serde_json::to_writer_pretty(file, &record)
        .map_err(|e| CpmError::DataLoad(format!("failed to write pixel-result JSON: {e}")))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Arc;

    use crate::data::{CutoutData, SyntheticSettings, generate_cutout};
    use crate::domain::{CpmSettings, PixelCoordinate, PolySettings};
    use crate::fit::PixelModel;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("tess-cpm-export-{}-{name}", std::process::id()))
    }

    fn fitted_model(with_poly: bool) -> PixelModel {
        let settings = SyntheticSettings {
            n_cadences: 40,
            n_rows: 8,
            n_cols: 8,
            noise_sigma: 0.5,
            systematic_amplitude: 20.0,
            seed: 31,
            ..SyntheticSettings::default()
        };
        let cube = generate_cutout(&settings).unwrap();
        let data = Arc::new(CutoutData::new(cube, true).unwrap());
        let mut model = PixelModel::new(data, PixelCoordinate::new(4, 4)).unwrap();
        model
            .add_cpm_model(&CpmSettings {
                exclusion_size: 2,
                n_predictors: 6,
                ..CpmSettings::default()
            })
            .unwrap();
        if with_poly {
            model.add_poly_model(&PolySettings::default()).unwrap();
            model.set_regs(&[0.01, 0.0]).unwrap();
        } else {
            model.set_regs(&[0.01]).unwrap();
        }
        model.holdout_fit_predict(2, None).unwrap();
        model
    }

    #[test]
    fn lightcurve_csv_has_one_row_per_cadence() {
        let lc = LightCurve {
            time: vec![0.0, 0.5, 1.0],
            flux: vec![1.25, -2.5, 3.0],
        };
        let path = temp_path("lc.csv");
        write_lightcurve_csv(&path, &lc, LightCurveKind::CpmSubtractedFlux).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "time,cpm_subtracted_flux");
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[2], "0.5000000000,-2.500000");
    }

    #[test]
    fn mismatched_lightcurve_axes_are_rejected() {
        let lc = LightCurve {
            time: vec![0.0, 1.0],
            flux: vec![1.0],
        };
        let err = write_lightcurve_csv(&temp_path("bad.csv"), &lc, LightCurveKind::Raw).unwrap_err();
        assert!(matches!(err, CpmError::DataLoad(_)));
    }

    #[test]
    fn lightcurve_json_round_trips() {
        let lc = LightCurve {
            time: vec![0.0, 0.5],
            flux: vec![10.0, -4.0],
        };
        let path = temp_path("lc.json");
        write_lightcurve_json(&path, &lc, LightCurveKind::Raw).unwrap();
        let record = read_lightcurve_json(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(record.kind, LightCurveKind::Raw);
        assert_eq!(record.time, lc.time);
        assert_eq!(record.flux, lc.flux);
    }

    #[test]
    fn pixel_csv_leaves_absent_blocks_blank() {
        let model = fitted_model(false);
        let result = model.result().unwrap();
        let path = temp_path("pixel.csv");
        write_pixel_result_csv(&path, result).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "time,target_flux,cpm_prediction,poly_prediction,combined_prediction,cpm_subtracted_flux,residual"
        );
        assert_eq!(lines.len(), 1 + result.time().len());
        let fields: Vec<&str> = lines[1].split(',').collect();
        assert_eq!(fields.len(), 7);
        assert!(!fields[2].is_empty());
        assert!(fields[3].is_empty());
        assert!(!fields[5].is_empty());
    }

    #[test]
    fn pixel_json_records_sections_and_weights() {
        let model = fitted_model(true);
        let result = model.result().unwrap();
        let path = temp_path("pixel.json");
        write_pixel_result_json(&path, result).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).ok();

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["time"].as_array().unwrap().len(), result.time().len());
        assert!(value["poly_prediction"].is_array());
        assert_eq!(value["block_labels"][0], "cpm");
        assert_eq!(value["sections"][0]["start"], 0);
        let weights = value["weights"].as_array().unwrap();
        assert_eq!(weights.len(), 2);
        assert_eq!(weights[0].as_array().unwrap().len(), 6 + 4);
    }

    #[test]
    fn unwritable_path_is_a_data_error() {
        let lc = LightCurve {
            time: vec![0.0],
            flux: vec![1.0],
        };
        let path = temp_path("no-such-dir").join("lc.csv");
        let err = write_lightcurve_csv(&path, &lc, LightCurveKind::Raw).unwrap_err();
        assert!(matches!(err, CpmError::DataLoad(_)));
    }
}
