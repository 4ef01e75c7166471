use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown montage: {name}")]
    UnknownMontage { name: String },

    #[error("unknown section '{section}' in montage '{montage}'")]
    UnknownSection { montage: String, section: String },

    #[error("unknown slot: {slot}")]
    UnknownSlot { slot: String },

    #[error("invalid montage '{montage}': {message}")]
    InvalidMontage { montage: String, message: String },

    #[error("bone '{bone}' has parent index {parent} which does not precede it")]
    InvalidBoneParent { bone: String, parent: usize },

    #[error("invalid value: {message}")]
    InvalidValue { message: String },

    #[cfg(feature = "json")]
    #[error("failed to parse montage JSON: {message}")]
    JsonParse { message: String },

    #[cfg(feature = "json")]
    #[error("unknown bone '{bone}' referenced by {context}")]
    JsonUnknownBone { context: String, bone: String },

    #[cfg(feature = "json")]
    #[error("unknown animation '{animation}' referenced by montage '{montage}'")]
    JsonUnknownAnimation { montage: String, animation: String },

    #[cfg(feature = "json")]
    #[error("unknown next section '{section}' referenced by montage '{montage}'")]
    JsonUnknownSection { montage: String, section: String },

    #[cfg(feature = "json")]
    #[error("unsupported {field} '{value}' in {context}")]
    JsonUnsupportedValue {
        context: String,
        field: String,
        value: String,
    },
}
