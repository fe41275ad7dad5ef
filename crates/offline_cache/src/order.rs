use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
};

use serde_json::Value;
use shared::domain::{ChannelId, ChannelIdentity};

pub type ChannelPositions = BTreeMap<ChannelId, usize>;

/// Order-key -> positions for that channel list.
pub type ChannelsOrder = BTreeMap<String, ChannelPositions>;

/// Object keys are sorted at every depth; array order is kept.
pub fn order_key(filters: &Value, sort: &Value) -> String {
    let mut key = String::new();
    write_canonical(filters, &mut key);
    key.push('_');
    write_canonical(sort, &mut key);
    key
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (index, (name, item)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(name.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

pub fn positions_of<T: ChannelIdentity>(channels: &[T]) -> ChannelPositions {
    channels
        .iter()
        .filter_map(|channel| channel.channel_id())
        .enumerate()
        .map(|(position, channel_id)| (channel_id.clone(), position))
        .collect()
}

// Id-less channels go last; uncached channels keep their input order.
pub fn sort_by_cached_positions<T>(channels: &[T], positions: &ChannelPositions) -> Vec<T>
where
    T: ChannelIdentity + Clone,
{
    let fallback: HashMap<&ChannelId, usize> = channels
        .iter()
        .enumerate()
        .filter_map(|(index, channel)| channel.channel_id().map(|id| (id, index)))
        .collect();

    let mut sorted: Vec<&T> = channels.iter().collect();
    sorted.sort_by(|a, b| {
        let (a, b) = match (a.channel_id(), b.channel_id()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Greater,
            (Some(_), None) => return Ordering::Less,
            (Some(a), Some(b)) => (a, b),
        };

        match (positions.get(a), positions.get(b)) {
            (None, None) => fallback.get(a).cmp(&fallback.get(b)),
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(pa), Some(pb)) => pa.cmp(pb),
        }
    });

    sorted.into_iter().cloned().collect()
}

pub fn cached_view<T>(channels: &[T], positions: &ChannelPositions) -> Vec<T>
where
    T: ChannelIdentity + Clone,
{
    sort_by_cached_positions(channels, positions)
        .into_iter()
        .filter(|channel| {
            channel
                .channel_id()
                .is_some_and(|id| positions.contains_key(id))
        })
        .collect()
}

pub fn order_by_cached_positions<T>(
    channels: &[T],
    order: &ChannelsOrder,
) -> HashMap<String, Vec<T>>
where
    T: ChannelIdentity + Clone,
{
    order
        .iter()
        .map(|(key, positions)| (key.clone(), cached_view(channels, positions)))
        .collect()
}

#[cfg(test)]
#[path = "tests/order_tests.rs"]
mod tests;
