pub fn my_func(v: u64) -> u64 {
    let doubled = v * 2;
    doubled
}
