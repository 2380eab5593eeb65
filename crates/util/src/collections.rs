/// Hash map used for node-keyed tables.
pub type Map<K, V> = ahash::AHashMap<K, V>;
