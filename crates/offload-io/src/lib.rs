//! # offload-io
//!
//! Bitmap reader and writer for the rotation demo.
//!
//! Images are exchanged as [`ImageGrid`](offload_compute::ImageGrid): one
//! `f32` luma sample per pixel, `rows` = height, `cols` = width.
//!
//! ```ignore
//! use offload_io::{read_bitmap, write_bitmap};
//!
//! let grid = read_bitmap("./Images/cat.bmp")?;
//! write_bitmap("cat-copy.bmp", &grid)?;
//! ```

pub mod bmp;
mod error;

pub use bmp::{read_bitmap, write_bitmap};
pub use error::{IoError, IoResult};
