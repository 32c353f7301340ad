use std::path::Path;

use log::debug;

use super::{discard_partial, CalcJob, MergeJob, RasterCalc};
use crate::error::{Error, Result};
use crate::raster::{Compression, Raster};

/// Evaluates jobs in-process over GeoTIFFs.
///
/// Inputs must share one grid. The output takes its georeferencing from the
/// first input and declares the job's NoData value.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeCalc {
    pub compression: Compression,
}

fn check_grid(first: (&Path, &Raster), other: (&Path, &Raster)) -> Result<()> {
    first.1.check_same_grid(other.1).map_err(|reason| Error::GridMismatch {
        left: first.0.to_path_buf(),
        right: other.0.to_path_buf(),
        reason,
    })
}

fn write_output(raster: &Raster, path: &Path, compression: Compression) -> Result<()> {
    raster.write(path, compression).inspect_err(|_| discard_partial(path))
}

fn overlay(dst: &mut [f32], layer: &Raster) {
    for (d, &src) in dst.iter_mut().zip(&layer.data) {
        if !layer.is_nodata(src) {
            *d = src;
        }
    }
}

impl RasterCalc for NativeCalc {
    fn name(&self) -> &'static str {
        "native"
    }

    fn calc(&self, job: &CalcJob) -> Result<()> {
        job.validate()?;
        debug!("calc {} = {}", job.output.display(), job.expr);

        let mut bands = Vec::with_capacity(job.inputs.len());
        for (band, path) in &job.inputs {
            bands.push((band.index(), path.as_path(), Raster::read(path)?));
        }
        let (_, first_path, first) = &bands[0];
        for (_, path, raster) in &bands[1..] {
            check_grid((*first_path, first), (*path, raster))?;
        }

        let slots = bands.iter().map(|(i, _, _)| i + 1).max().unwrap_or(0);
        let mut pixel = vec![0.0f64; slots];
        let mut data = Vec::with_capacity(first.data.len());
        for idx in 0..first.data.len() {
            for (band, _, raster) in &bands {
                pixel[*band] = f64::from(raster.data[idx]);
            }
            let v = job.expr.eval(&pixel) as f32;
            data.push(if v.is_finite() { v } else { job.nodata });
        }

        let mut out = Raster::from_data(first.width, first.height, data)?.with_nodata(job.nodata);
        out.geo = first.geo.clone();
        write_output(&out, &job.output, self.compression)
    }

    fn merge(&self, job: &MergeJob) -> Result<()> {
        job.validate()?;
        debug!("merge {} inputs into {}", job.inputs.len(), job.output.display());

        let first_path = &job.inputs[0];
        let first = Raster::read(first_path)?;
        let mut merged = Raster {
            data: vec![job.nodata; first.data.len()],
            width: first.width,
            height: first.height,
            nodata: Some(job.nodata),
            geo: first.geo.clone(),
        };
        overlay(&mut merged.data, &first);
        for path in &job.inputs[1..] {
            let layer = Raster::read(path)?;
            check_grid((first_path.as_path(), &first), (path.as_path(), &layer))?;
            overlay(&mut merged.data, &layer);
        }
        write_output(&merged, &job.output, self.compression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::Band;
    use crate::raster::GeoTags;
    use std::path::PathBuf;

    fn write(dir: &Path, name: &str, data: Vec<f32>) -> PathBuf {
        let path = dir.join(name);
        Raster::from_data(2, 2, data)
            .unwrap()
            .with_nodata(0.0)
            .with_geo(GeoTags::geographic(0.0, 10.0, 0.5))
            .write(&path, Compression::Lzw)
            .unwrap();
        path
    }

    #[test]
    fn calc_evaluates_per_pixel_and_keeps_geo() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.tif", vec![1.0, 2.0, 0.0, -5.0]);
        let b = write(dir.path(), "b.tif", vec![10.0, 10.0, 10.0, 10.0]);
        let out = dir.path().join("out.tif");

        let job = CalcJob::new(Band::A.expr().positive_part() * Band::B.expr(), &out)
            .input(Band::A, &a)
            .input(Band::B, &b);
        NativeCalc::default().calc(&job).unwrap();

        let r = Raster::read(&out).unwrap();
        assert_eq!(r.data, [10.0, 20.0, 0.0, 0.0]);
        assert_eq!(r.nodata, Some(0.0));
        assert_eq!(r.geo, Some(GeoTags::geographic(0.0, 10.0, 0.5)));
    }

    #[test]
    fn calc_rejects_mismatched_grids() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.tif", vec![1.0; 4]);
        let b = dir.path().join("b.tif");
        Raster::new(3, 1, 1.0).write(&b, Compression::Lzw).unwrap();
        let out = dir.path().join("out.tif");

        let job = CalcJob::new(Band::A.expr() + Band::B.expr(), &out)
            .input(Band::A, &a)
            .input(Band::B, &b);
        assert!(matches!(NativeCalc::default().calc(&job).unwrap_err(), Error::GridMismatch { .. }));
        assert!(!out.exists());
    }

    #[test]
    fn calc_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let job = CalcJob::new(Band::A.expr(), dir.path().join("out.tif"))
            .input(Band::A, dir.path().join("absent.tif"));
        assert!(matches!(NativeCalc::default().calc(&job).unwrap_err(), Error::MissingInput(_)));
    }

    #[test]
    fn merge_later_inputs_overwrite_valid_pixels_only() {
        let dir = tempfile::tempdir().unwrap();
        let first = write(dir.path(), "1.tif", vec![1.0, 1.0, 0.0, 0.0]);
        let second = write(dir.path(), "2.tif", vec![0.0, 7.0, 0.0, 3.0]);
        let out = dir.path().join("merged.tif");

        NativeCalc::default().merge(&MergeJob::new(vec![first, second], &out)).unwrap();
        assert_eq!(Raster::read(&out).unwrap().data, [1.0, 7.0, 0.0, 3.0]);
    }

    #[test]
    fn deflate_output_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.tif", vec![1.0, 2.0, 3.0, 4.0]);
        let out = dir.path().join("out.tif");

        let calc = NativeCalc { compression: Compression::Deflate };
        calc.calc(&CalcJob::new(Band::A.expr() * 2.0, &out).input(Band::A, &a)).unwrap();
        assert_eq!(Raster::read(&out).unwrap().data, [2.0, 4.0, 6.0, 8.0]);
    }
}
