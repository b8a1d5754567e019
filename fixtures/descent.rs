fn func_e(depth: u64) -> u64 {
    let value = depth + 1;
    value
}

fn func_d(depth: u64) -> u64 {
    func_e(depth + 1)
}

fn func_c(depth: u64) -> u64 {
    func_d(depth + 1)
}

fn func_b(depth: u64) -> u64 {
    func_c(depth + 1)
}

fn func_a(depth: u64) -> u64 {
    func_b(depth + 1)
}

fn main() {
    let total = func_a(0);
    println!("{total}");
}
