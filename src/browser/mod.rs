//! 浏览器层：启动 / 连接浏览器，并把页面操作抽象为 `BrowserDriver`

pub mod chromium;
pub mod connection;
pub mod driver;
pub mod headless;

pub use chromium::ChromiumDriver;
pub use connection::connect_to_browser;
pub use driver::{BrowserDriver, PageHandle};
pub use headless::launch_headless_browser;
