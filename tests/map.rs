use std::time::{Duration, Instant};
use tidemap::TideMap;

/// Background resizes are asynchronous; poll until the map settles into the
/// expected shape instead of assuming the swap has happened.
fn settle(mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "resize did not settle in time");
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn insert_get_update_remove() {
    let map = TideMap::new();
    assert_eq!(map.insert(4i64, 9), None);
    assert_eq!(map.insert(8i64, 24), None);
    assert_eq!(map.get(&4), Some(9));
    assert_eq!(map.get(&8), Some(24));
    assert_eq!(map.len(), 2);

    assert_eq!(map.insert(4, 10), Some(9));
    assert_eq!(map.get(&4), Some(10));
    assert_eq!(map.len(), 2);

    assert_eq!(map.remove(&4), Some(10));
    assert_eq!(map.get(&4), None);
    assert!(!map.contains_key(&4));
    assert!(map.contains_key(&8));
    assert_eq!(map.len(), 1);
}

#[test]
fn remove_is_idempotent() {
    let map: TideMap<i64, i64> = TideMap::new();
    assert_eq!(map.remove(&999), None);
    assert_eq!(map.get(&999), None);
    assert_eq!(map.remove(&999), None);
    assert!(map.is_empty());
}

#[test]
fn get_or_insert_does_not_overwrite() {
    let map = TideMap::new();
    map.insert(42i64, "a");
    assert_eq!(map.get_or_insert(42, "b"), ("a", true));
    assert_eq!(map.get(&42), Some("a"));

    assert_eq!(map.get_or_insert(43, "c"), ("c", false));
    assert_eq!(map.get(&43), Some("c"));
}

#[test]
fn string_keys_look_up_by_borrowed_form() {
    let tokens: TideMap<String, i64> = TideMap::new();
    tokens.insert("tok-1181".to_owned(), 1181);
    assert_eq!(tokens.get("tok-1181"), Some(1181));
    assert!(tokens.contains_key("tok-1181"));
    assert_eq!(tokens.remove("tok-1181"), Some(1181));
    assert_eq!(tokens.get("tok-1181"), None);
}

#[test]
fn growth_keeps_every_entry() {
    let map = TideMap::new();
    assert_eq!(map.capacity(), 16);

    for key in 0..200i64 {
        map.insert(key, key * 3);
    }

    // 200 entries over 16 buckets is far past the growth threshold; every key
    // stays reachable both mid-flight and after the swap.
    for key in 0..200 {
        assert_eq!(map.get(&key), Some(key * 3));
    }

    settle(|| map.capacity() > 16);
    for key in 0..200 {
        assert_eq!(map.get(&key), Some(key * 3));
    }
    settle(|| map.len() == 200);
}

#[test]
fn capacity_floor_holds_without_growth() {
    let map = TideMap::new();
    for key in 0..5i64 {
        map.insert(key, key);
    }
    for key in 0..5 {
        assert_eq!(map.remove(&key), Some(key));
    }

    // Nothing to migrate and nowhere to shrink to: the floor table stays.
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(map.capacity(), 16);
    assert!(map.is_empty());
    assert_eq!(map.remove(&0), None);
}

#[test]
fn draining_a_grown_map_shrinks_but_respects_the_floor() {
    let map = TideMap::new();
    for key in 0..400i64 {
        map.insert(key, key);
    }
    settle(|| map.capacity() > 16);
    let peak = map.capacity();

    for key in 0..400 {
        map.remove(&key);
    }
    settle(|| map.capacity() < peak);
    assert!(map.capacity() >= 16);
    settle(|| map.len() == 0);
    for key in 0..400 {
        assert_eq!(map.get(&key), None);
    }
}

#[test]
fn collects_from_an_iterator() {
    let map: TideMap<i64, i64> = (0..50i64).map(|key| (key, key + 7)).collect();
    assert_eq!(map.len(), 50);
    assert_eq!(map.get(&49), Some(56));

    let mut map = map;
    map.extend([(50i64, 57i64), (51, 58)]);
    assert_eq!(map.len(), 52);
    assert_eq!(map.get(&51), Some(58));
}

#[test]
fn debug_reports_shape_only() {
    let map = TideMap::new();
    map.insert(1i64, 1i64);
    let rendered = format!("{map:?}");
    assert!(rendered.contains("TideMap"));
    assert!(rendered.contains("len"));
}

#[test]
fn drop_joins_the_maintainer_mid_resize() {
    let map = TideMap::new();
    for key in 0..500i64 {
        map.insert(key, key);
    }
    // Dropping right after crossing the growth threshold must shut the
    // maintainer down whether or not the migration has started.
    drop(map);
}
