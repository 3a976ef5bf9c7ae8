mod walk;

pub use walk::{build_image_file_map, is_image_path, IMAGE_EXTENSIONS};
