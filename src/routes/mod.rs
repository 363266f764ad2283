pub mod assess;
pub mod health;
pub mod logs;
pub mod runs;
pub mod settings;
