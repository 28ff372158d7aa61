//! Windows driver built on UI Automation through the uiautomation crate.

pub mod driver;
pub mod element;
mod utils;

pub use driver::WindowsDriver;
pub use element::WindowsUIElement;
