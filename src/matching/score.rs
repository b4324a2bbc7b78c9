use super::WaitingEntry;

const WEIGHT_KARMA: f64 = 0.40;
const WEIGHT_LOCATION: f64 = 0.30;
const WEIGHT_INTERESTS: f64 = 0.20;
const WEIGHT_AGE: f64 = 0.10;

const DEFAULT_AGE: i64 = 25;
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Compatibility score for an unordered pair, in `[-1, 100]`.
///
/// `-1` means a hard filter ruled the pair out entirely; otherwise the value
/// is a weighted sum of karma, location, interest and age closeness, each in
/// `[0, 100]`. Symmetric in its arguments.
pub fn score(a: &WaitingEntry, b: &WaitingEntry) -> f64 {
    if !(passes_hard_filters(a, b) && passes_hard_filters(b, a)) {
        return -1.0;
    }

    let karma_diff = (a.profile.karma - b.profile.karma).abs() as f64;
    let score_karma = (100.0 - karma_diff).max(0.0);

    let score_location = match (a.profile.coordinates(), b.profile.coordinates()) {
        (Some((lat1, lon1)), Some((lat2, lon2))) => {
            (100.0 - 2.0 * haversine_km(lat1, lon1, lat2, lon2)).max(0.0)
        }
        _ => 0.0,
    };

    let interests_a = a.profile.interest_set();
    let interests_b = b.profile.interest_set();
    let score_interests = if interests_a.is_empty() || interests_b.is_empty() {
        0.0
    } else {
        let common = interests_a.intersection(&interests_b).count() as f64;
        let total = interests_a.union(&interests_b).count() as f64;
        common / total * 100.0
    };

    let age_a = a.profile.age.unwrap_or(DEFAULT_AGE);
    let age_b = b.profile.age.unwrap_or(DEFAULT_AGE);
    let score_age = (100.0 - 5.0 * (age_a - age_b).abs() as f64).max(0.0);

    WEIGHT_KARMA * score_karma
        + WEIGHT_LOCATION * score_location
        + WEIGHT_INTERESTS * score_interests
        + WEIGHT_AGE * score_age
}

/// One direction of the hard-filter check: does `candidate` satisfy the
/// preferences of `seeker`? Filters only apply when the seeker opted in.
fn passes_hard_filters(seeker: &WaitingEntry, candidate: &WaitingEntry) -> bool {
    if !seeker.use_filters {
        return true;
    }

    if let Some(preference) = seeker.profile.filter_gender.as_deref() {
        let same = seeker.profile.gender == candidate.profile.gender;
        match preference {
            "opposite" if same => return false,
            "same" if !same => return false,
            _ => {}
        }
    }

    // An explicit age bound fails candidates who never set an age.
    let candidate_age = candidate.profile.age.unwrap_or(0);
    if let Some(min) = seeker.profile.filter_age_min {
        if candidate_age < min {
            return false;
        }
    }
    if let Some(max) = seeker.profile.filter_age_max {
        if candidate_age > max {
            return false;
        }
    }

    true
}

/// Great-circle distance between two coordinates, in kilometers.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * a.sqrt().asin() * EARTH_RADIUS_KM
}
