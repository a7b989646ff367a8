use super::*;

#[test]
fn catalogue_has_seventeen_unique_ids() {
    assert_eq!(AMENITIES.len(), 17);
    let mut ids: Vec<&str> = AMENITIES.iter().map(|a| a.id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 17);
}

#[test]
fn lookup_by_id() {
    let gym = by_id("fitness").expect("fitness");
    assert_eq!(gym.led_count, 35);
    assert_eq!(gym.color, Rgb { r: 255, g: 80, b: 80 });
    assert_eq!(gym.image_label(3), "View 4");
    assert!(by_id("pool").is_none());
}

#[test]
fn photo_amenities_are_listed_first() {
    let with: Vec<&str> = with_images().map(|a| a.id).collect();
    assert_eq!(with.len(), 7);
    assert_eq!(AMENITIES[..7].iter().map(|a| a.id).collect::<Vec<_>>(), with);
}

#[test]
fn image_path_is_under_amenities() {
    assert_eq!(image_path("gym1.jpg"), "/amenities/gym1.jpg");
}
