use geo::{coord, Rect};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Real-valued backscatter (dB), anomaly (sigma) or count data
pub type SarReal = f32;

/// 2D real raster array (rows x cols)
pub type SarRealImage = Array2<SarReal>;

/// Per-pixel validity mask; `false` marks no-data
pub type ValidityMask = Array2<bool>;

/// Coordinate system enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// Geographic coordinates (latitude, longitude)
    Geographic,
    /// Projected coordinates (e.g., UTM, EASE-Grid)
    Projected { epsg: u32 },
}

impl Default for CoordinateSystem {
    fn default() -> Self {
        // EASE-Grid 2.0 global, equal-area: pixel sums of counts stay meaningful
        CoordinateSystem::Projected { epsg: 6933 }
    }
}

/// Polarization modes for Sentinel-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
            Polarization::HV => write!(f, "HV"),
            Polarization::HH => write!(f, "HH"),
        }
    }
}

/// Sentinel-1 acquisition mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AcquisitionMode {
    IW, // Interferometric Wide swath
    EW, // Extra Wide swath
    SM, // StripMap
    WV, // Wave
}

impl std::fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Orbit direction at acquisition time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OrbitPass {
    Ascending,
    Descending,
}

impl std::fmt::Display for OrbitPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrbitPass::Ascending => write!(f, "ASCENDING"),
            OrbitPass::Descending => write!(f, "DESCENDING"),
        }
    }
}

/// The two analysis windows. Index 0 is the pre-event baseline, index 1 the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowKind {
    Baseline,
    Event,
}

impl WindowKind {
    pub const ALL: [WindowKind; 2] = [WindowKind::Baseline, WindowKind::Event];

    pub fn index(self) -> usize {
        match self {
            WindowKind::Baseline => 0,
            WindowKind::Event => 1,
        }
    }

    pub fn from_index(index: usize) -> FloodResult<Self> {
        match index {
            0 => Ok(WindowKind::Baseline),
            1 => Ok(WindowKind::Event),
            _ => Err(FloodError::Config(format!(
                "window index {} out of range (0 = baseline, 1 = event)",
                index
            ))),
        }
    }
}

impl std::fmt::Display for WindowKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowKind::Baseline => write!(f, "baseline"),
            WindowKind::Event => write!(f, "event"),
        }
    }
}

/// Source mission of a scene collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sensor {
    Sentinel1,
    Sentinel2,
}

impl std::fmt::Display for Sensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sensor::Sentinel1 => write!(f, "Sentinel-1"),
            Sensor::Sentinel2 => write!(f, "Sentinel-2"),
        }
    }
}

/// North-up affine transform (no rotation terms)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub top_left_y: f64,
    pub pixel_height: f64, // negative for north-up
}

/// Pixel grid shared by every raster derived from the same substrate query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterGrid {
    pub transform: GeoTransform,
    pub rows: usize,
    pub cols: usize,
    pub crs: CoordinateSystem,
}

const GRID_TOLERANCE: f64 = 1e-6;

impl RasterGrid {
    /// Square-pixel north-up grid anchored at its top-left corner
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_size: f64, rows: usize, cols: usize) -> Self {
        Self {
            transform: GeoTransform {
                top_left_x,
                pixel_width: pixel_size,
                top_left_y,
                pixel_height: -pixel_size,
            },
            rows,
            cols,
            crs: CoordinateSystem::default(),
        }
    }

    pub fn with_crs(mut self, crs: CoordinateSystem) -> Self {
        self.crs = crs;
        self
    }

    pub fn dim(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Nominal scale in CRS units (meters for projected grids)
    pub fn pixel_size(&self) -> f64 {
        self.transform.pixel_width.abs()
    }

    pub fn pixel_area(&self) -> f64 {
        (self.transform.pixel_width * self.transform.pixel_height).abs()
    }

    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let t = &self.transform;
        (
            t.top_left_x + (col as f64 + 0.5) * t.pixel_width,
            t.top_left_y + (row as f64 + 0.5) * t.pixel_height,
        )
    }

    /// Pixel containing the point, if it falls inside the grid
    pub fn locate(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let t = &self.transform;
        let col = ((x - t.top_left_x) / t.pixel_width).floor();
        let row = ((y - t.top_left_y) / t.pixel_height).floor();
        if col < 0.0 || row < 0.0 || !col.is_finite() || !row.is_finite() {
            return None;
        }
        let (row, col) = (row as usize, col as usize);
        (row < self.rows && col < self.cols).then_some((row, col))
    }

    pub fn bounds(&self) -> Rect<f64> {
        let t = &self.transform;
        let x1 = t.top_left_x + self.cols as f64 * t.pixel_width;
        let y1 = t.top_left_y + self.rows as f64 * t.pixel_height;
        Rect::new(
            coord! { x: t.top_left_x, y: t.top_left_y },
            coord! { x: x1, y: y1 },
        )
    }

    /// True when both grids address exactly the same pixels
    pub fn is_aligned_with(&self, other: &RasterGrid) -> bool {
        let (a, b) = (&self.transform, &other.transform);
        self.rows == other.rows
            && self.cols == other.cols
            && self.crs == other.crs
            && (a.top_left_x - b.top_left_x).abs() < GRID_TOLERANCE
            && (a.top_left_y - b.top_left_y).abs() < GRID_TOLERANCE
            && (a.pixel_width - b.pixel_width).abs() < GRID_TOLERANCE
            && (a.pixel_height - b.pixel_height).abs() < GRID_TOLERANCE
    }

    pub fn ensure_aligned(&self, other: &RasterGrid, what: &str) -> FloodResult<()> {
        if self.is_aligned_with(other) {
            Ok(())
        } else {
            Err(FloodError::GridMismatch(format!(
                "{}: {}x{} grid at ({:.2}, {:.2}) vs {}x{} grid at ({:.2}, {:.2})",
                what,
                self.rows,
                self.cols,
                self.transform.top_left_x,
                self.transform.top_left_y,
                other.rows,
                other.cols,
                other.transform.top_left_x,
                other.transform.top_left_y
            )))
        }
    }
}

/// Raster values with an explicit no-data mask.
///
/// Masked pixels are never read as numbers: `get` returns `None` for them, so a missing
/// observation cannot be mistaken for a zero anomaly or a zero count.
#[derive(Debug, Clone)]
pub struct MaskedRaster {
    pub grid: RasterGrid,
    pub values: SarRealImage,
    pub valid: ValidityMask,
}

impl MaskedRaster {
    pub fn new(grid: RasterGrid, values: SarRealImage, valid: ValidityMask) -> FloodResult<Self> {
        if values.dim() != grid.dim() || valid.dim() != grid.dim() {
            return Err(FloodError::GridMismatch(format!(
                "raster {:?} / mask {:?} do not match grid {:?}",
                values.dim(),
                valid.dim(),
                grid.dim()
            )));
        }
        Ok(Self { grid, values, valid })
    }

    /// Every finite value is valid
    pub fn from_values(grid: RasterGrid, values: SarRealImage) -> FloodResult<Self> {
        let valid = values.mapv(|v| v.is_finite());
        Self::new(grid, values, valid)
    }

    pub fn from_options(grid: RasterGrid, data: Array2<Option<SarReal>>) -> FloodResult<Self> {
        let valid = data.mapv(|v| v.map_or(false, |x| x.is_finite()));
        let values = data.mapv(|v| v.unwrap_or(f32::NAN));
        Self::new(grid, values, valid)
    }

    pub fn filled(grid: RasterGrid, value: SarReal) -> Self {
        let values = Array2::from_elem(grid.dim(), value);
        let valid = Array2::from_elem(grid.dim(), value.is_finite());
        Self { grid, values, valid }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.grid.dim()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<SarReal> {
        match (self.valid.get((row, col)), self.values.get((row, col))) {
            (Some(true), Some(v)) if v.is_finite() => Some(*v),
            _ => None,
        }
    }

    /// Mask out every pixel where `keep` is false
    pub fn clip(&self, keep: &ValidityMask) -> FloodResult<Self> {
        if keep.dim() != self.dim() {
            return Err(FloodError::GridMismatch(format!(
                "clip mask {:?} does not match raster {:?}",
                keep.dim(),
                self.dim()
            )));
        }
        let mut clipped = self.clone();
        ndarray::Zip::from(&mut clipped.valid)
            .and(keep)
            .for_each(|valid, &k| *valid = *valid && k);
        Ok(clipped)
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|v| **v).count()
    }
}

/// A derived value tagged with the parameter version it was computed from
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// Error types for flood mapping
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FloodError {
    #[error("Empty collection: no {sensor} scenes matched the {window} window")]
    EmptyCollection { window: WindowKind, sensor: Sensor },

    #[error("Degenerate statistics: {masked} of {total} pixels have zero or undefined baseline deviation")]
    DegenerateStatistics { masked: usize, total: usize },

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("Layer not found: {0}")]
    LayerNotFound(String),

    #[error("Reduction needs {pixels} pixels, exact mode allows {max_pixels}")]
    PixelBudgetExceeded { pixels: u64, max_pixels: u64 },

    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Substrate error: {0}")]
    Substrate(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for flood mapping operations
pub type FloodResult<T> = Result<T, FloodError>;
