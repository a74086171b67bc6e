use thiserror::Error;

#[derive(Error, Debug)]
pub enum CintrError {
	#[error("syntax error: {0}")]
	SyntaxError(String),
	#[error("system error: {0}")]
	SystemError(String),
	#[error("configuration error: {0}")]
	ConfigError(String),
	#[error("cost file error: {0}")]
	CostFileError(String),
	#[error("unsupported shape in {0}: {1}")]
	ShapeError(String, String),
}

pub type Result<T> = std::result::Result<T, CintrError>;

pub fn map_sys_err(e: std::io::Error) -> CintrError {
	CintrError::SystemError(e.to_string())
}
