pub mod console;
pub mod loggerbridge;
pub mod presets;
pub mod replay;
pub mod settings;
