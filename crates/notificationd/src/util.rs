use std::{collections::HashMap, hash::Hash};

use itertools::Itertools;

#[macro_export]
macro_rules! print_result_err {
    ($context:expr, $result:expr $(,)?) => {{
        if let Err(err) = $result {
            log::error!("[{}:{}] Error {}: {:?}", ::std::file!(), ::std::line!(), $context, err);
        }
    }};
}

/// Keys whose value differs between `old` and `new`, including keys present in only one of them. Sorted.
pub fn changed_keys<K, V>(old: &HashMap<K, V>, new: &HashMap<K, V>) -> Vec<K>
where
    K: Clone + Eq + Hash + Ord,
    V: PartialEq,
{
    old.keys().chain(new.keys()).unique().filter(|key| old.get(*key) != new.get(*key)).cloned().sorted().collect()
}
