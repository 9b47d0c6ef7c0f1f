use chrono::Utc;

pub fn current_timestamp_utc() -> u64 {
    Utc::now().timestamp_millis() as u64
}

pub fn round_float_to_precision(value: f64, precision: f64) -> f64 {
    if precision <= 0.0 {
        return value;
    }

    let scaling_factor = 1.0 / precision;
    (value * scaling_factor).floor() / scaling_factor
}
