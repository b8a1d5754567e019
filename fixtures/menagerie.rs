#[repr(i8)]
#[allow(dead_code)]
enum Mood {
    Negative = -1,
    Neutral = 0,
    Final = 100,
}

struct Pair {
    field_a: i32,
    field_b: [u8; 16],
}

#[allow(unused_variables)]
fn observe(total: f64) {
    std::thread::sleep(std::time::Duration::from_millis(1));
}

fn main() {
    let c: i32 = 3;
    let big: i64 = -4_000_000_000;
    let unsigned: u64 = 12_345_678_901;
    let flag: bool = true;
    let ratio: f64 = 0.5;
    let basic_text: [u8; 14] = *b"Hello, world!\0";
    let value: u32 = 77;
    let opaque: *const () = &value as *const u32 as *const ();
    let mood: Mood = Mood::Negative;
    let closing: Mood = Mood::Final;
    let arr: [f32; 14] = [
        1.25, 0.5, 2.0, 0.0, 4.0, 5.5, 6.0, 6.5, 7.0, 8.0, 9.0, 10.0, 11.0, 7.5,
    ];
    let counts: [u32; 5] = [49, 50, 51, 52, 53];
    let pair = Pair {
        field_a: 123,
        field_b: *b"this is field_b\0",
    };
    let total = ratio + arr[0] as f64 + counts[4] as f64 + pair.field_a as f64;
    observe(total);
    let keep = (c, big, unsigned, flag, basic_text, opaque, mood, closing);
    let _ = keep;
}
