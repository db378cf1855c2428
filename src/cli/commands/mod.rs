mod config;
mod publish;
mod serve;
mod tail;

pub use config::execute_config;
pub use publish::execute_publish;
pub use serve::execute_serve;
pub use tail::execute_tail;
