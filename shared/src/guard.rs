/// True when `key` already lives under the destination prefix.
///
/// Processed images are published into the bucket they came from, so a trigger that
/// also watches the destination prefix would otherwise republish forever.
pub fn should_skip(key: &str, destination_prefix: &str) -> bool {
    key.starts_with(destination_prefix)
}
