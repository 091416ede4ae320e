//! Minimal GeoTIFF codec for single-band rasters.
//!
//! Decoding reads one grayscale image plus the GeoTIFF tags needed to place
//! it on a grid: ModelTransformation, or ModelTiepoint + ModelPixelScale, the
//! projected/geographic type keys of the GeoKeyDirectory, and GDAL's nodata
//! tag. Encoding writes one page per band with the same tags.
//!
//! A decoder is built over a borrowed byte slice for every call. Nothing is
//! cached or shared between calls, so any number of threads may decode
//! concurrently.

use std::io::{Cursor, Seek, Write};

use ndarray::Array2;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{self, ColorType as EncoderColorType};
use tiff::encoder::{TiffEncoder, TiffValue};
use tiff::tags::Tag;
use tiff::{ColorType, TiffError, TiffResult};

use crate::asset::PixelWindow;
use crate::raster::{Crs, GeoTransform, SampleType};

// =============================================================================
// Tag and key constants
// =============================================================================

pub const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
pub const TAG_MODEL_TIEPOINT: u16 = 33922;
pub const TAG_MODEL_TRANSFORMATION: u16 = 34264;
pub const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
pub const TAG_GDAL_NODATA: u16 = 42113;

const KEY_MODEL_TYPE: u16 = 1024;
const KEY_RASTER_TYPE: u16 = 1025;
const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const KEY_PROJECTED_CS_TYPE: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

/// A decoded raster with its georeferencing.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRaster {
    pub data: Array2<f64>,
    pub transform: GeoTransform,
    pub crs: Crs,
    pub nodata: Option<f64>,
    pub sample_type: SampleType,
}

/// Largest decoded sample buffer accepted for one asset (1 GiB).
///
/// Covers a full 10980 × 10980 tile at 64 bits per sample.
pub const MAX_DECODED_BYTES: usize = 1 << 30;

/// Decodes a single-band GeoTIFF, optionally cropping to `window`.
///
/// Rasters without georeferencing tags get [`GeoTransform::pixel_grid`].
pub fn decode(bytes: &[u8], window: Option<PixelWindow>) -> Result<DecodedRaster, String> {
    let mut limits = Limits::default();
    limits.decoding_buffer_size = MAX_DECODED_BYTES;
    decode_with_limits(bytes, window, limits)
}

fn decode_with_limits(bytes: &[u8], window: Option<PixelWindow>, limits: Limits) -> Result<DecodedRaster, String> {
    let mut decoder = Decoder::new(Cursor::new(bytes))
        .map_err(describe)?
        .with_limits(limits);

    match decoder.colortype().map_err(describe)? {
        ColorType::Gray(_) => {}
        other => return Err(format!("expected a single-band raster, found {:?}", other)),
    }

    let (width, height) = decoder.dimensions().map_err(describe)?;
    let (width, height) = (width as usize, height as usize);

    let transform = read_transform(&mut decoder)?.unwrap_or_else(GeoTransform::pixel_grid);
    let crs = read_crs(&mut decoder)?;
    let nodata = read_nodata(&mut decoder)?;

    let (samples, sample_type) = to_f64(decoder.read_image().map_err(describe)?)?;
    let data = Array2::from_shape_vec((height, width), samples).map_err(|e| e.to_string())?;

    let (data, transform) = match window {
        Some(w) => {
            if !w.fits_within(width, height) {
                return Err(format!(
                    "window {}x{}+{}+{} outside raster {}x{}",
                    w.width, w.height, w.col_off, w.row_off, width, height
                ));
            }
            let cropped = data
                .slice(ndarray::s![
                    w.row_off..w.row_off + w.height,
                    w.col_off..w.col_off + w.width
                ])
                .to_owned();
            (cropped, transform.shifted(w.col_off as isize, w.row_off as isize))
        }
        None => (data, transform),
    };

    Ok(DecodedRaster {
        data,
        transform,
        crs,
        nodata,
        sample_type,
    })
}

fn describe(err: TiffError) -> String {
    err.to_string()
}

fn find_f64s<R: std::io::Read + Seek>(
    decoder: &mut Decoder<R>,
    tag: u16,
) -> Result<Option<Vec<f64>>, String> {
    match decoder.find_tag(Tag::from_u16_exhaustive(tag)).map_err(describe)? {
        Some(value) => value.into_f64_vec().map(Some).map_err(describe),
        None => Ok(None),
    }
}

fn read_transform<R: std::io::Read + Seek>(
    decoder: &mut Decoder<R>,
) -> Result<Option<GeoTransform>, String> {
    if let Some(m) = find_f64s(decoder, TAG_MODEL_TRANSFORMATION)? {
        if m.len() < 8 {
            return Err(format!("ModelTransformation has {} values, expected 16", m.len()));
        }
        return Ok(Some(GeoTransform::from_gdal([
            m[3], m[0], m[1], m[7], m[4], m[5],
        ])));
    }

    let tiepoint = find_f64s(decoder, TAG_MODEL_TIEPOINT)?;
    let scale = find_f64s(decoder, TAG_MODEL_PIXEL_SCALE)?;
    match (tiepoint, scale) {
        (Some(tp), Some(sc)) if tp.len() >= 6 && sc.len() >= 2 => {
            // Tiepoint maps raster (I, J) to model (X, Y).
            let (i, j, x, y) = (tp[0], tp[1], tp[3], tp[4]);
            let (sx, sy) = (sc[0], sc[1]);
            Ok(Some(GeoTransform::north_up(x - i * sx, y + j * sy, sx, -sy)))
        }
        (None, None) => Ok(None),
        _ => Err("incomplete georeferencing: tiepoint and pixel scale must both be present".into()),
    }
}

fn read_crs<R: std::io::Read + Seek>(decoder: &mut Decoder<R>) -> Result<Crs, String> {
    let keys = match decoder
        .find_tag(Tag::from_u16_exhaustive(TAG_GEO_KEY_DIRECTORY))
        .map_err(describe)?
    {
        Some(value) => value.into_u16_vec().map_err(describe)?,
        None => return Ok(Crs::Unknown),
    };
    if keys.len() < 4 {
        return Ok(Crs::Unknown);
    }

    let count = keys[3] as usize;
    let mut geographic = None;
    for entry in keys[4..].chunks_exact(4).take(count) {
        let (key, location, value) = (entry[0], entry[1], entry[3]);
        // Only inline SHORT values carry EPSG codes.
        if location != 0 {
            continue;
        }
        match key {
            KEY_PROJECTED_CS_TYPE => return Ok(Crs::Epsg(value as u32)),
            KEY_GEOGRAPHIC_TYPE => geographic = Some(value as u32),
            _ => {}
        }
    }
    Ok(geographic.map(Crs::Epsg).unwrap_or(Crs::Unknown))
}

fn read_nodata<R: std::io::Read + Seek>(decoder: &mut Decoder<R>) -> Result<Option<f64>, String> {
    match decoder
        .find_tag(Tag::from_u16_exhaustive(TAG_GDAL_NODATA))
        .map_err(describe)?
    {
        Some(value) => {
            let text = value.into_string().map_err(describe)?;
            let text = text.trim_matches(char::from(0)).trim();
            match text.to_lowercase().as_str() {
                "nan" => Ok(Some(f64::NAN)),
                _ => text
                    .parse::<f64>()
                    .map(Some)
                    .map_err(|_| format!("invalid GDAL_NODATA value '{}'", text)),
            }
        }
        None => Ok(None),
    }
}

fn to_f64(result: DecodingResult) -> Result<(Vec<f64>, SampleType), String> {
    #[allow(unreachable_patterns)]
    let converted = match result {
        DecodingResult::U8(v) => (v.into_iter().map(f64::from).collect(), SampleType::U8),
        DecodingResult::U16(v) => (v.into_iter().map(f64::from).collect(), SampleType::U16),
        DecodingResult::U32(v) => (v.into_iter().map(f64::from).collect(), SampleType::U32),
        DecodingResult::I8(v) => (v.into_iter().map(f64::from).collect(), SampleType::I8),
        DecodingResult::I16(v) => (v.into_iter().map(f64::from).collect(), SampleType::I16),
        DecodingResult::I32(v) => (v.into_iter().map(f64::from).collect(), SampleType::I32),
        DecodingResult::F32(v) => (v.into_iter().map(f64::from).collect(), SampleType::F32),
        DecodingResult::F64(v) => (v, SampleType::F64),
        DecodingResult::U64(_) | DecodingResult::I64(_) => {
            return Err("64-bit integer samples are not supported".into())
        }
        _ => return Err("unsupported sample format".into()),
    };
    Ok(converted)
}

// =============================================================================
// Encoding
// =============================================================================

/// One page (band) to encode.
#[derive(Debug, Clone, Copy)]
pub struct EncodePage<'a> {
    /// Stored as the page's ImageDescription (the band name).
    pub description: &'a str,
    pub data: &'a Array2<f64>,
    pub transform: GeoTransform,
    pub crs: Crs,
    pub nodata: Option<f64>,
    pub sample_type: SampleType,
}

/// Encodes pages into one (multi-page) GeoTIFF held in memory.
pub fn encode(pages: &[EncodePage<'_>]) -> TiffResult<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut cursor)?;
        for page in pages {
            encode_page(&mut encoder, page)?;
        }
    }
    Ok(cursor.into_inner())
}

fn encode_page<W: Write + Seek>(encoder: &mut TiffEncoder<W>, page: &EncodePage<'_>) -> TiffResult<()> {
    let samples = page.data.iter().copied();
    match page.sample_type {
        SampleType::U8 => {
            let v: Vec<u8> = samples.map(|s| s as u8).collect();
            write_typed::<_, colortype::Gray8>(encoder, page, &v)
        }
        SampleType::U16 => {
            let v: Vec<u16> = samples.map(|s| s as u16).collect();
            write_typed::<_, colortype::Gray16>(encoder, page, &v)
        }
        SampleType::U32 => {
            let v: Vec<u32> = samples.map(|s| s as u32).collect();
            write_typed::<_, colortype::Gray32>(encoder, page, &v)
        }
        SampleType::I8 => {
            let v: Vec<i8> = samples.map(|s| s as i8).collect();
            write_typed::<_, colortype::GrayI8>(encoder, page, &v)
        }
        SampleType::I16 => {
            let v: Vec<i16> = samples.map(|s| s as i16).collect();
            write_typed::<_, colortype::GrayI16>(encoder, page, &v)
        }
        SampleType::I32 => {
            let v: Vec<i32> = samples.map(|s| s as i32).collect();
            write_typed::<_, colortype::GrayI32>(encoder, page, &v)
        }
        SampleType::F32 => {
            let v: Vec<f32> = samples.map(|s| s as f32).collect();
            write_typed::<_, colortype::Gray32Float>(encoder, page, &v)
        }
        SampleType::F64 => {
            let v: Vec<f64> = samples.collect();
            write_typed::<_, colortype::Gray64Float>(encoder, page, &v)
        }
    }
}

fn write_typed<W: Write + Seek, C: EncoderColorType>(
    encoder: &mut TiffEncoder<W>,
    page: &EncodePage<'_>,
    samples: &[C::Inner],
) -> TiffResult<()>
where
    [C::Inner]: TiffValue,
{
    let (rows, cols) = page.data.dim();
    let mut image = encoder.new_image::<C>(cols as u32, rows as u32)?;

    let dir = image.encoder();
    dir.write_tag(Tag::ImageDescription, page.description)?;

    let gt = page.transform;
    if gt.is_north_up() {
        dir.write_tag(
            Tag::Unknown(TAG_MODEL_PIXEL_SCALE),
            &[gt.pixel_width, -gt.pixel_height, 0.0][..],
        )?;
        dir.write_tag(
            Tag::Unknown(TAG_MODEL_TIEPOINT),
            &[0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0][..],
        )?;
    } else {
        let matrix = [
            gt.pixel_width, gt.row_rotation, 0.0, gt.origin_x,
            gt.col_rotation, gt.pixel_height, 0.0, gt.origin_y,
            0.0, 0.0, 0.0, 0.0,
            0.0, 0.0, 0.0, 1.0,
        ];
        dir.write_tag(Tag::Unknown(TAG_MODEL_TRANSFORMATION), &matrix[..])?;
    }

    if let Some(keys) = geo_key_directory(page.crs) {
        dir.write_tag(Tag::Unknown(TAG_GEO_KEY_DIRECTORY), &keys[..])?;
    }

    if let Some(nodata) = page.nodata {
        let text = if nodata.is_nan() {
            "nan".to_string()
        } else {
            nodata.to_string()
        };
        dir.write_tag(Tag::Unknown(TAG_GDAL_NODATA), text.as_str())?;
    }

    image.write_data(samples)
}

fn geo_key_directory(crs: Crs) -> Option<Vec<u16>> {
    let code = u16::try_from(crs.epsg()?).ok()?;
    // EPSG 4000-4999 are geographic CRS codes.
    let (model_type, key) = if (4000..5000).contains(&code) {
        (MODEL_TYPE_GEOGRAPHIC, KEY_GEOGRAPHIC_TYPE)
    } else {
        (MODEL_TYPE_PROJECTED, KEY_PROJECTED_CS_TYPE)
    };
    Some(vec![
        1, 1, 0, 3,
        KEY_MODEL_TYPE, 0, 1, model_type,
        KEY_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA,
        key, 0, 1, code,
    ])
}

/// Number of pages in an encoded TIFF.
#[cfg(test)]
pub(crate) fn page_count(bytes: &[u8]) -> TiffResult<usize> {
    let mut decoder = Decoder::new(Cursor::new(bytes))?;
    let mut pages = 1;
    while decoder.more_images() {
        decoder.next_image()?;
        pages += 1;
    }
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn page<'a>(data: &'a Array2<f64>, sample_type: SampleType) -> EncodePage<'a> {
        EncodePage {
            description: "red",
            data,
            transform: GeoTransform::north_up(500_000.0, 9_000_000.0, 10.0, -10.0),
            crs: Crs::Epsg(32723),
            nodata: Some(-9999.0),
            sample_type,
        }
    }

    #[test]
    fn test_decode_restores_georeferencing() {
        let data = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let bytes = encode(&[page(&data, SampleType::I16)]).unwrap();

        let decoded = decode(&bytes, None).unwrap();
        assert_eq!(decoded.data, data);
        assert_eq!(decoded.sample_type, SampleType::I16);
        assert_eq!(decoded.crs, Crs::Epsg(32723));
        assert_eq!(decoded.nodata, Some(-9999.0));
        assert_eq!(
            decoded.transform,
            GeoTransform::north_up(500_000.0, 9_000_000.0, 10.0, -10.0)
        );
    }

    #[test]
    fn test_decode_window_shifts_origin() {
        let data = Array2::from_shape_fn((4, 5), |(r, c)| (r * 10 + c) as f64);
        let bytes = encode(&[page(&data, SampleType::U16)]).unwrap();

        let decoded = decode(&bytes, Some(PixelWindow::new(1, 2, 3, 2))).unwrap();
        assert_eq!(decoded.data, array![[21.0, 22.0, 23.0], [31.0, 32.0, 33.0]]);
        assert_eq!(decoded.transform.origin_x, 500_010.0);
        assert_eq!(decoded.transform.origin_y, 8_999_980.0);
    }

    #[test]
    fn test_decode_window_out_of_bounds() {
        let data = Array2::<f64>::zeros((4, 4));
        let bytes = encode(&[page(&data, SampleType::U8)]).unwrap();
        assert!(decode(&bytes, Some(PixelWindow::new(2, 2, 3, 3))).is_err());
    }

    #[test]
    fn test_decode_enforces_buffer_limit() {
        let data = Array2::<f64>::zeros((64, 64));
        let bytes = encode(&[page(&data, SampleType::U16)]).unwrap();

        let mut limits = Limits::default();
        limits.decoding_buffer_size = 1024;
        assert!(decode_with_limits(&bytes, None, limits).is_err());
        assert!(decode(&bytes, None).is_ok());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode(b"definitely not a tiff", None).is_err());
    }

    #[test]
    fn test_float_samples_preserved() {
        let data = array![[0.25, -1.5], [1e6, 3.0]];
        let bytes = encode(&[page(&data, SampleType::F32)]).unwrap();
        let decoded = decode(&bytes, None).unwrap();
        assert_eq!(decoded.sample_type, SampleType::F32);
        assert_eq!(decoded.data, data);
    }

    #[test]
    fn test_multi_page_encoding() {
        let a = Array2::<f64>::zeros((2, 2));
        let b = Array2::<f64>::ones((2, 2));
        let bytes = encode(&[page(&a, SampleType::U16), page(&b, SampleType::U16)]).unwrap();
        assert_eq!(page_count(&bytes).unwrap(), 2);
    }

    #[test]
    fn test_geographic_crs_key() {
        let keys = geo_key_directory(Crs::Epsg(4326)).unwrap();
        assert_eq!(keys[7], MODEL_TYPE_GEOGRAPHIC);
        assert_eq!(keys[12], KEY_GEOGRAPHIC_TYPE);
        assert!(geo_key_directory(Crs::Unknown).is_none());
    }
}
