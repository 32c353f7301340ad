//! Single-band raster tiles and their GeoTIFF encoding.
//!
//! Pixels are held as f32, row-major, row 0 = northern edge (file order).
//! Georeferencing tags are carried through unchanged so derived tiles line up
//! with their inputs.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Seek, Write};
use std::path::Path;
use std::str::FromStr;

use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::Gray32Float;
use tiff::encoder::compression as tiff_compression;
use tiff::encoder::TiffEncoder;
use tiff::tags::Tag;

use crate::error::{Error, Result};

/// NoData value declared on every raster this crate writes.
pub const NODATA: f32 = 0.0;

// GeoTIFF / GDAL private tag ids
const MODEL_PIXEL_SCALE: u16 = 33550;
const MODEL_TIEPOINT: u16 = 33922;
const GEO_KEY_DIRECTORY: u16 = 34735;
const GEO_DOUBLE_PARAMS: u16 = 34736;
const GEO_ASCII_PARAMS: u16 = 34737;
const GDAL_NODATA: u16 = 42113;

fn tag(id: u16) -> Tag {
    Tag::from_u16_exhaustive(id)
}

/// Output encoding. Every write is compressed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compression {
    #[default]
    Lzw,
    Deflate,
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "lzw" => Ok(Compression::Lzw),
            "deflate" => Ok(Compression::Deflate),
            other => Err(Error::Config(format!("unknown compression `{other}` (expected lzw or deflate)"))),
        }
    }
}

/// GeoTIFF georeferencing tags, copied verbatim between rasters.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoTags {
    pub pixel_scale: Vec<f64>,
    pub tiepoint: Vec<f64>,
    pub geokeys: Vec<u16>,
    pub double_params: Option<Vec<f64>>,
    pub ascii_params: Option<String>,
}

impl GeoTags {
    /// WGS84 lat/lon georeferencing with the upper-left corner at
    /// (`min_lon`, `max_lat`) and square pixels of `pixel_deg` degrees.
    pub fn geographic(min_lon: f64, max_lat: f64, pixel_deg: f64) -> Self {
        Self {
            pixel_scale: vec![pixel_deg, pixel_deg, 0.0],
            tiepoint: vec![0.0, 0.0, 0.0, min_lon, max_lat, 0.0],
            // version 1.1.0, 3 keys: model type geographic, pixel-is-area, EPSG:4326
            geokeys: vec![1, 1, 0, 3, 1024, 0, 1, 2, 1025, 0, 1, 1, 2048, 0, 1, 4326],
            double_params: None,
            ascii_params: None,
        }
    }

    fn read<R: io::Read + Seek>(decoder: &mut Decoder<R>) -> Option<Self> {
        let pixel_scale = decoder.get_tag_f64_vec(tag(MODEL_PIXEL_SCALE)).ok()?;
        let tiepoint = decoder.get_tag_f64_vec(tag(MODEL_TIEPOINT)).ok()?;
        let geokeys = decoder.get_tag_u16_vec(tag(GEO_KEY_DIRECTORY)).ok()?;
        Some(Self {
            pixel_scale,
            tiepoint,
            geokeys,
            double_params: decoder.get_tag_f64_vec(tag(GEO_DOUBLE_PARAMS)).ok(),
            ascii_params: decoder.get_tag_ascii_string(tag(GEO_ASCII_PARAMS)).ok(),
        })
    }
}

/// One band of one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    /// Row-major pixel values.
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
    /// Declared NoData value, if the file carried one.
    pub nodata: Option<f32>,
    pub geo: Option<GeoTags>,
}

impl Raster {
    /// A raster filled with `fill`, without NoData or georeferencing.
    pub fn new(width: usize, height: usize, fill: f32) -> Self {
        Self {
            data: vec![fill; width * height],
            width,
            height,
            nodata: None,
            geo: None,
        }
    }

    pub fn from_data(width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        if width == 0 || height == 0 || data.len() != width * height {
            return Err(Error::Config(format!(
                "{} pixels cannot fill a {width}×{height} raster",
                data.len()
            )));
        }
        Ok(Self { data, width, height, nodata: None, geo: None })
    }

    pub fn with_nodata(mut self, nodata: f32) -> Self {
        self.nodata = Some(nodata);
        self
    }

    pub fn with_geo(mut self, geo: GeoTags) -> Self {
        self.geo = Some(geo);
        self
    }

    /// True for NaN or the NoData value (0 when none is declared).
    #[inline]
    pub fn is_nodata(&self, v: f32) -> bool {
        v.is_nan() || v == self.nodata.unwrap_or(NODATA)
    }

    /// False when every pixel is NoData.
    pub fn has_data(&self) -> bool {
        self.data.iter().any(|&v| !self.is_nodata(v))
    }

    /// Ok when both rasters cover the same grid; otherwise why not.
    pub fn check_same_grid(&self, other: &Raster) -> std::result::Result<(), String> {
        if (self.width, self.height) != (other.width, other.height) {
            return Err(format!(
                "{}×{} vs {}×{} pixels",
                self.width, self.height, other.width, other.height
            ));
        }
        if let (Some(a), Some(b)) = (&self.geo, &other.geo) {
            if a.pixel_scale != b.pixel_scale {
                return Err(format!("pixel size {:?} vs {:?}", a.pixel_scale, b.pixel_scale));
            }
            if a.tiepoint != b.tiepoint {
                return Err(format!("origin {:?} vs {:?}", a.tiepoint, b.tiepoint));
            }
        }
        Ok(())
    }

    // ── GeoTIFF I/O ──────────────────────────────────────────────────────────

    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::MissingInput(path.to_path_buf()),
            _ => Error::Io(e),
        })?;
        let raster_err = |reason: String| Error::Raster { path: path.to_path_buf(), reason };

        let mut decoder = Decoder::new(BufReader::new(file))?.with_limits(Limits::unlimited());
        let (width, height) = decoder.dimensions()?;
        let (width, height) = (width as usize, height as usize);

        let nodata = decoder
            .get_tag_ascii_string(tag(GDAL_NODATA))
            .ok()
            .and_then(|s| s.trim_matches(|c: char| c == '\0' || c.is_whitespace()).parse::<f32>().ok());
        let geo = GeoTags::read(&mut decoder);

        #[allow(unreachable_patterns)]
        let data: Vec<f32> = match decoder.read_image()? {
            DecodingResult::U8(v) => v.into_iter().map(f32::from).collect(),
            DecodingResult::I8(v) => v.into_iter().map(f32::from).collect(),
            DecodingResult::U16(v) => v.into_iter().map(f32::from).collect(),
            DecodingResult::I16(v) => v.into_iter().map(f32::from).collect(),
            DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
            DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
            DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
            DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
            DecodingResult::F32(v) => v,
            DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
            _ => return Err(raster_err("unsupported sample format".into())),
        };

        if data.len() != width * height {
            return Err(raster_err(format!(
                "expected a single band ({} samples for {width}×{height})",
                data.len()
            )));
        }

        Ok(Self { data, width, height, nodata, geo })
    }

    /// Writes a compressed Float32 GeoTIFF, declaring NoData and
    /// georeferencing when present.
    pub fn write(&self, path: &Path, compression: Compression) -> Result<()> {
        if self.width == 0 || self.height == 0 || self.data.len() != self.width * self.height {
            return Err(Error::Raster {
                path: path.to_path_buf(),
                reason: "refusing to write a malformed raster".into(),
            });
        }
        let file = File::create(path)?;
        let mut encoder = TiffEncoder::new(BufWriter::new(file))?;
        match compression {
            Compression::Lzw => self.encode(&mut encoder, tiff_compression::Lzw::default()),
            Compression::Deflate => self.encode(&mut encoder, tiff_compression::Deflate::default()),
        }
    }

    fn encode<W: Write + Seek, D: tiff_compression::Compression>(
        &self,
        encoder: &mut TiffEncoder<W>,
        compression: D,
    ) -> Result<()> {
        let mut image = encoder.new_image_with_compression::<Gray32Float, D>(
            self.width as u32,
            self.height as u32,
            compression,
        )?;
        {
            let dir = image.encoder();
            if let Some(nodata) = self.nodata {
                dir.write_tag(tag(GDAL_NODATA), nodata.to_string().as_str())?;
            }
            if let Some(geo) = &self.geo {
                dir.write_tag(tag(MODEL_PIXEL_SCALE), geo.pixel_scale.as_slice())?;
                dir.write_tag(tag(MODEL_TIEPOINT), geo.tiepoint.as_slice())?;
                dir.write_tag(tag(GEO_KEY_DIRECTORY), geo.geokeys.as_slice())?;
                if let Some(params) = &geo.double_params {
                    dir.write_tag(tag(GEO_DOUBLE_PARAMS), params.as_slice())?;
                }
                if let Some(ascii) = &geo.ascii_params {
                    dir.write_tag(tag(GEO_ASCII_PARAMS), ascii.as_str())?;
                }
            }
        }
        image.write_data(&self.data)?;
        Ok(())
    }
}
