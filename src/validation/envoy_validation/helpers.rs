use crate::{Error, Result};
use envoy_types::pb::envoy::config::core::v3::{data_source::Specifier, DataSource};
use envoy_types::pb::google::protobuf::Any;
use prost::Message;

/// Try encoding any envoy message to ensure protobuf compatibility.
pub fn encode_check<T: Message>(message: &T, context: &str) -> Result<()> {
    if message.encode_to_vec().is_empty() {
        return Err(Error::validation(format!("{}: failed envoy-types encoding", context)));
    }
    Ok(())
}

/// A typed config must name its type and carry a payload the named message
/// decodes from.
pub fn typed_config_check<T: Message + Default>(any: &Any, expected_type_url: &str) -> Result<T> {
    if any.type_url != expected_type_url {
        return Err(Error::validation(format!(
            "Expected typed config '{}', found '{}'",
            expected_type_url, any.type_url
        )));
    }
    T::decode(any.value.as_slice())
        .map_err(|e| Error::validation(format!("Undecodable '{}': {}", expected_type_url, e)))
}

/// Data sources must point somewhere non-empty.
pub fn data_source_check(source: Option<&DataSource>, field: &str) -> Result<()> {
    let present = match source.and_then(|s| s.specifier.as_ref()) {
        Some(Specifier::Filename(path)) => !path.is_empty(),
        Some(Specifier::InlineBytes(bytes)) => !bytes.is_empty(),
        Some(Specifier::InlineString(value)) => !value.is_empty(),
        Some(Specifier::EnvironmentVariable(name)) => !name.is_empty(),
        None => false,
    };

    if present {
        Ok(())
    } else {
        Err(Error::validation_field(format!("{} data source is empty", field), field))
    }
}
