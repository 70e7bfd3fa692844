//! FITS file writer.
//!
//! The CFITSIO library is an external collaborator; we
//! reach it through the `fitsio` crate the same way `mwalib` (the
//! radio-astronomy sibling in this pack) does, rather than binding libcfitsio
//! by hand. Responsible for: creating the primary HDU as a 2-D `DOUBLE`
//! image of the sensor geometry, writing the mean image, emitting every
//! record from a [`FitsHeaderStore`] snapshot in insertion order, then
//! overwriting the engine-reserved keywords (`DATE`, `DATE-OBS`, `UTSTART`,
//! `MJD`, `EXPTIME`, `COADDSEC`, `COADDNUM`).

use std::path::Path;

use chrono::{DateTime, Utc};
use fitsio::hdu::FitsHdu;
use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;

use crate::buffer::Geometry;
use crate::error::Result;
use crate::fits_header::{FitsHeaderStore, Value};
use crate::mjd::mjd_no_leap_seconds;

/// Reserved values written after the user header, in documented order.
pub struct ReservedKeys {
    pub exposure_start: DateTime<Utc>,
    pub exptime_sec: f64,
    pub coadd_sec: f64,
    pub coadd_num: u32,
}

pub fn write_fits_image(
    path: &Path,
    geometry: Geometry,
    mean_image: &[f64],
    header: &FitsHeaderStore,
    reserved: &ReservedKeys,
) -> Result<()> {
    let mut fptr = FitsFile::create(path).open()?;
    let description = ImageDescription {
        data_type: ImageType::Double,
        dimensions: &[geometry.height, geometry.width],
    };
    let hdu = fptr.create_image("PRIMARY".to_string(), &description)?;
    hdu.write_image(&mut fptr, mean_image)?;

    write_user_header(&mut fptr, &hdu, header)?;
    write_reserved_keys(&mut fptr, &hdu, reserved)?;

    // `fptr` flushes and closes the file on drop.
    Ok(())
}

fn write_user_header(fptr: &mut FitsFile, hdu: &FitsHdu, header: &FitsHeaderStore) -> Result<()> {
    for record in header.iter() {
        match &record.value {
            Value::Boolean(v) => {
                hdu.write_key(fptr, &record.keyword, *v)?;
            }
            Value::Integer(v) => {
                hdu.write_key(fptr, &record.keyword, *v)?;
            }
            Value::Float(v) => {
                hdu.write_key(fptr, &record.keyword, *v)?;
            }
            Value::Str(v) => {
                hdu.write_key(fptr, &record.keyword, v.as_str())?;
            }
            Value::Comment => {
                if let Some(text) = &record.comment {
                    hdu.write_key(fptr, "COMMENT", text.as_str())?;
                }
            }
        }
    }
    Ok(())
}

fn write_reserved_keys(fptr: &mut FitsFile, hdu: &FitsHdu, reserved: &ReservedKeys) -> Result<()> {
    let now = reserved.exposure_start;
    hdu.write_key(fptr, "DATE", now.format("%Y-%m-%dT%H:%M:%S%.3f").to_string().as_str())?;
    hdu.write_key(fptr, "DATE-OBS", now.format("%Y-%m-%d").to_string().as_str())?;
    hdu.write_key(fptr, "UTSTART", now.format("%H:%M:%S%.3f").to_string().as_str())?;
    hdu.write_key(fptr, "MJD", mjd_no_leap_seconds(now))?;
    hdu.write_key(fptr, "EXPTIME", round6(reserved.exptime_sec))?;
    hdu.write_key(fptr, "COADDSEC", round6(reserved.coadd_sec))?;
    hdu.write_key(fptr, "COADDNUM", i64::from(reserved.coadd_num))?;
    Ok(())
}

/// `EXPTIME`/`COADDSEC` are documented as fixed 6-decimal-place values
/// (doubles use fixed-precision 6-decimal formatting);
/// rounding here (rather than relying on the writer's default float
/// formatting) keeps `COADDNUM * COADDSEC ~= EXPTIME` exact to the
/// documented precision.
fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}
