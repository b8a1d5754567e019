fn plunge(depth: u64) -> u64 {
    if depth == 0 {
        return 0;
    }
    plunge(depth - 1) + 1
}

fn main() {
    let total = plunge(6);
    println!("{total}");
}
