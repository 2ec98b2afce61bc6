use ndarray::Array2;

use crate::types::{FloodError, FloodResult, MaskedRaster};

/// Terrain slope in degrees from an elevation raster (meters).
///
/// Central differences on the interior; border pixels copy their inward neighbour.
/// A pixel whose stencil touches no-data stays masked.
pub fn slope_degrees(dem: &MaskedRaster) -> FloodResult<MaskedRaster> {
    let (rows, cols) = dem.dim();
    if rows < 3 || cols < 3 {
        return Err(FloodError::Processing(format!(
            "elevation raster {}x{} is too small for slope computation",
            rows, cols
        )));
    }

    let dx_scale = dem.grid.transform.pixel_width.abs() as f32;
    let dy_scale = dem.grid.transform.pixel_height.abs() as f32;

    let mut slope = Array2::<Option<f32>>::from_elem((rows, cols), None);
    for i in 1..rows - 1 {
        for j in 1..cols - 1 {
            let stencil = (
                dem.get(i, j + 1),
                dem.get(i, j - 1),
                dem.get(i + 1, j),
                dem.get(i - 1, j),
            );
            if let (Some(east), Some(west), Some(south), Some(north)) = stencil {
                let dz_dx = (east - west) / (2.0 * dx_scale);
                let dz_dy = (south - north) / (2.0 * dy_scale);
                slope[[i, j]] = Some((dz_dx * dz_dx + dz_dy * dz_dy).sqrt().atan().to_degrees());
            }
        }
    }

    fill_edges(&mut slope);
    MaskedRaster::from_options(dem.grid.clone(), slope)
}

fn fill_edges(array: &mut Array2<Option<f32>>) {
    let (rows, cols) = array.dim();

    for j in 0..cols {
        array[[0, j]] = array[[1, j]];
        array[[rows - 1, j]] = array[[rows - 2, j]];
    }

    for i in 0..rows {
        array[[i, 0]] = array[[i, 1]];
        array[[i, cols - 1]] = array[[i, cols - 2]];
    }
}
