//! Settings cascade.
//!
//! Raw settings text from each subject (site, organization, user) is parsed
//! into a [`Cascade`] and published by the [`SettingsResolver`]. Parse failures
//! are carried as [`ParseError`] values next to the data they replace.

mod cascade;
mod edit;
mod parse;
mod resolver;

pub use cascade::{
    Cascade, ConfiguredSubject, ExtensionSettings, Settings, SettingsOrError, Subject,
    SubjectKind,
};
pub use edit::{
    target_subject, ConfigurationUpdateParams, EditError, EditResult, PathSegment,
    SettingsEditor, UpdateExtensionSettingsArgs,
};
pub use parse::{parse_jsonc, parse_jsonc_as, ParseError};
pub use resolver::{resolve, RawCascade, RawSubject, SettingsResolver};
