mod second;

fn main() {
    let x = second::my_func(2);
    let y = x + 1;
    println!("{y}");
}
