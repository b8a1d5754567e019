use std::time::Duration;

fn tick(count: u64) -> u64 {
    count + 1
}

fn main() {
    let mut count: u64 = 0;
    loop {
        count = tick(count);
        std::thread::sleep(Duration::from_millis(1));
        if count == u64::MAX {
            break;
        }
    }
}
