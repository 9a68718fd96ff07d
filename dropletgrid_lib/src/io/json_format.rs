//! Helper functions for the JSON grid description format

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, anyhow};

use crate::Real;
use crate::grid::{GridDescription, GridShape, GridboxBounds};

/// `(global_index, lower, upper)` as stored in the file
type RawGridbox = (usize, [f64; 3], [f64; 3]);

/// Loads the bounds of all gridboxes from a JSON file and validates them against the grid shape
///
/// The gridboxes are expected to be stored in an array with one entry per gridbox consisting of
/// the global index, the lower bounds and the upper bounds, each ordered `(z, x, y)`. For example:
/// ```json
/// [[0, [0.0, 0.0, 0.0], [50.0, 100.0, 100.0]], [1, [50.0, 0.0, 0.0], [100.0, 100.0, 100.0]]]
/// ```
pub fn grid_description_from_json<R: Real, P: AsRef<Path>>(
    json_file: P,
    shape: GridShape,
) -> Result<GridDescription<R>, anyhow::Error> {
    let path = json_file.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Cannot open grid description file \"{}\"", path.display()))?;
    let reader = BufReader::new(file);

    let raw: Vec<RawGridbox> = serde_json::from_reader(reader).context(
        "Parsing of grid description failed. Expected JSON array of gridboxes like e.g. '[[0, [0.0, 0.0, 0.0], [1.0, 1.0, 1.0]]]'.",
    )?;

    let convert = |values: [f64; 3], global_index: usize| -> Result<[R; 3], anyhow::Error> {
        let mut converted = [R::zero(); 3];
        for (c, v) in converted.iter_mut().zip(values) {
            *c = v.try_convert().ok_or_else(|| {
                anyhow!(
                    "Failed to convert bounds of gridbox {} to the target float type, value out of range?",
                    global_index
                )
            })?;
        }
        Ok(converted)
    };

    let gridboxes = raw
        .into_iter()
        .map(|(global_index, lower, upper)| {
            Ok(GridboxBounds {
                global_index,
                lower: convert(lower, global_index)?,
                upper: convert(upper, global_index)?,
            })
        })
        .collect::<Result<Vec<_>, anyhow::Error>>()?;

    GridDescription::new(shape, gridboxes)
        .with_context(|| format!("Invalid grid description in \"{}\"", path.display()))
}
