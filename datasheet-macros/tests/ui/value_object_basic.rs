use datasheet_macros::value_object;

#[value_object]
#[derive(Default)]
struct Color {
    index: u8,
}

#[value_object(eq = false)]
struct Ratio(f64);

#[value_object(debug = false)]
enum Level {
    Low,
    High,
}

fn main() {
    let a = Color::default();
    let _b = a.clone();
    assert!(a == Color { index: 0 });
    let _ = format!("{:?}", Ratio(0.5));
    let _ = Ratio(0.5) == Ratio(0.5);
    let _ = matches!(Level::High, Level::High) && !matches!(Level::Low, Level::High);
}
