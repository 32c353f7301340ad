use std::ffi::OsString;
use std::path::Path;
use std::process::Command;

use log::debug;

use super::{discard_partial, CalcJob, MergeJob, RasterCalc};
use crate::error::{Error, Result};
use crate::raster::Compression;

/// Runs `gdal_calc.py` and `gdal_merge.py`.
///
/// `gdal_calc.py` is called with `--hideNoData` so input NoData is never
/// masked implicitly; every expression spells out its own masking.
#[derive(Debug, Clone)]
pub struct GdalCalc {
    pub calc_program: String,
    pub merge_program: String,
    pub compression: Compression,
}

impl Default for GdalCalc {
    fn default() -> Self {
        Self {
            calc_program: "gdal_calc.py".into(),
            merge_program: "gdal_merge.py".into(),
            compression: Compression::default(),
        }
    }
}

fn creation_option(c: Compression) -> &'static str {
    match c {
        Compression::Lzw => "COMPRESS=LZW",
        Compression::Deflate => "COMPRESS=DEFLATE",
    }
}

impl GdalCalc {
    pub fn calc_args(&self, job: &CalcJob) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        for (band, path) in &job.inputs {
            args.push(format!("-{}", band.letter()).into());
            args.push(path.into());
        }
        args.push(format!("--calc={}", job.expr).into());
        let mut outfile = OsString::from("--outfile=");
        outfile.push(&job.output);
        args.push(outfile);
        args.push(format!("--NoDataValue={}", job.nodata).into());
        args.push("--hideNoData".into());
        args.push("--type=Float32".into());
        args.push("--co".into());
        args.push(creation_option(self.compression).into());
        args.push("--overwrite".into());
        args.push("--quiet".into());
        args
    }

    pub fn merge_args(&self, job: &MergeJob) -> Vec<OsString> {
        let nodata = job.nodata.to_string();
        let mut args: Vec<OsString> = vec!["-o".into(), (&job.output).into()];
        for flag in ["-n", nodata.as_str(), "-a_nodata", nodata.as_str(), "-ot", "Float32", "-co"] {
            args.push(flag.into());
        }
        args.push(creation_option(self.compression).into());
        args.push("-q".into());
        args.extend(job.inputs.iter().map(OsString::from));
        args
    }

    fn run(&self, program: &str, args: &[OsString], output: &Path) -> Result<()> {
        debug!(
            "{program} {}",
            args.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>().join(" ")
        );
        let out = Command::new(program).args(args).output().map_err(|source| Error::Spawn {
            program: program.to_owned(),
            source,
        })?;
        if !out.status.success() {
            discard_partial(output);
            return Err(Error::ExternalTool {
                program: program.to_owned(),
                status: out.status.to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_owned(),
            });
        }
        Ok(())
    }
}

impl RasterCalc for GdalCalc {
    fn name(&self) -> &'static str {
        "gdal"
    }

    fn calc(&self, job: &CalcJob) -> Result<()> {
        job.validate()?;
        self.run(&self.calc_program, &self.calc_args(job), &job.output)
    }

    fn merge(&self, job: &MergeJob) -> Result<()> {
        job.validate()?;
        // gdal_merge.py updates an existing output in place
        discard_partial(&job.output);
        self.run(&self.merge_program, &self.merge_args(job), &job.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calc::Band;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn calc_command_line() {
        let job = CalcJob::new(Band::A.expr().positive_part() * Band::B.expr(), "/w/out.tif")
            .input(Band::B, "/w/b.tif")
            .input(Band::A, "/w/a.tif");
        let args = strings(GdalCalc::default().calc_args(&job));
        assert_eq!(
            args,
            [
                "-A", "/w/a.tif", "-B", "/w/b.tif",
                "--calc=((A>0)*A)*B", "--outfile=/w/out.tif",
                "--NoDataValue=0", "--hideNoData", "--type=Float32",
                "--co", "COMPRESS=LZW", "--overwrite", "--quiet",
            ]
        );
    }

    #[test]
    fn merge_command_line_keeps_input_order() {
        let job = MergeJob::new(vec!["1.tif".into(), "2.tif".into()], "m.tif");
        let deflate = GdalCalc { compression: Compression::Deflate, ..GdalCalc::default() };
        let args = strings(deflate.merge_args(&job));
        assert_eq!(args[..2], ["-o", "m.tif"]);
        assert!(args.contains(&"COMPRESS=DEFLATE".to_string()));
        assert_eq!(args[args.len() - 2..], ["1.tif", "2.tif"]);
    }

    #[test]
    fn failing_tool_removes_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.tif");
        std::fs::write(&out, b"partial").unwrap();
        let calc = GdalCalc { calc_program: "false".into(), merge_program: "false".into(), ..GdalCalc::default() };
        let job = CalcJob::new(Band::A.expr(), &out).input(Band::A, "a.tif");
        let err = calc.calc(&job).unwrap_err();
        assert!(matches!(err, Error::ExternalTool { .. }));
        assert!(!out.exists());
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let calc = GdalCalc {
            calc_program: "definitely-not-gdal-calc".into(),
            merge_program: "definitely-not-gdal-merge".into(),
            ..GdalCalc::default()
        };
        let job = CalcJob::new(Band::A.expr(), "out.tif").input(Band::A, "a.tif");
        assert!(matches!(calc.calc(&job).unwrap_err(), Error::Spawn { .. }));
    }
}
