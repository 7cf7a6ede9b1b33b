pub mod library;
pub mod thumbnail;

pub use library::{LibraryService, LibraryStatus, ReembedReport};
pub use thumbnail::ImageProcessor;
