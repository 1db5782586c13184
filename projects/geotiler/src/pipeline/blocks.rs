use crate::raster::PixelWindow;

/// Walks a raster in fixed-size blocks for segmentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockIterator {
    /// Raster smaller than one block in either dimension: read it whole.
    SingleBlock { cols: usize, rows: usize, done: bool },
    /// Row-major blocks; the last row and column are truncated to the raster.
    GridScan {
        cols: usize,
        rows: usize,
        cut_w: usize,
        cut_h: usize,
        next_row: usize,
        next_col: usize,
    },
}

impl BlockIterator {
    pub fn new(cols: usize, rows: usize, cut_w: usize, cut_h: usize) -> Self {
        if cols < cut_w || rows < cut_h || cut_w == 0 || cut_h == 0 {
            Self::SingleBlock {
                cols,
                rows,
                done: false,
            }
        } else {
            Self::GridScan {
                cols,
                rows,
                cut_w,
                cut_h,
                next_row: 0,
                next_col: 0,
            }
        }
    }

    pub fn is_single_block(&self) -> bool {
        matches!(self, Self::SingleBlock { .. })
    }
}

impl Iterator for BlockIterator {
    type Item = PixelWindow;

    fn next(&mut self) -> Option<PixelWindow> {
        match self {
            Self::SingleBlock { cols, rows, done } => {
                if *done {
                    return None;
                }
                *done = true;
                Some(PixelWindow::new(0, 0, *cols, *rows))
            }
            Self::GridScan {
                cols,
                rows,
                cut_w,
                cut_h,
                next_row,
                next_col,
            } => {
                if *next_row >= *rows {
                    return None;
                }
                let window = PixelWindow::new(
                    *next_col as i64,
                    *next_row as i64,
                    (*cut_w).min(*cols - *next_col),
                    (*cut_h).min(*rows - *next_row),
                );
                *next_col += *cut_w;
                if *next_col >= *cols {
                    *next_col = 0;
                    *next_row += *cut_h;
                }
                Some(window)
            }
        }
    }
}
