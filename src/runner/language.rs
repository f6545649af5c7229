//! Languages offered by the code runner.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageDescriptor {
    pub id: &'static str,
    pub label: &'static str,
    pub extension: &'static str,
    /// Runs through a live engine instead of scripted playback.
    pub has_real_engine: bool,
}

const fn lang(
    id: &'static str,
    label: &'static str,
    extension: &'static str,
    has_real_engine: bool,
) -> LanguageDescriptor {
    LanguageDescriptor {
        id,
        label,
        extension,
        has_real_engine,
    }
}

pub const LANGUAGES: &[LanguageDescriptor] = &[
    lang("python", "Python", "py", true),
    lang("javascript", "JavaScript", "js", true),
    lang("typescript", "TypeScript", "ts", false),
    lang("rust", "Rust", "rs", false),
    lang("go", "Go", "go", false),
    lang("ruby", "Ruby", "rb", false),
    lang("java", "Java", "java", false),
    lang("cpp", "C++", "cpp", false),
    lang("c", "C", "c", false),
    lang("bash", "Bash", "sh", false),
    lang("php", "PHP", "php", false),
    lang("swift", "Swift", "swift", false),
    lang("kotlin", "Kotlin", "kt", false),
    lang("r", "R", "r", false),
    lang("lua", "Lua", "lua", false),
];

pub fn find(id: &str) -> Option<&'static LanguageDescriptor> {
    LANGUAGES.iter().find(|l| l.id == id)
}

/// Looks a language up by id or file extension.
pub fn resolve(name: &str) -> Option<&'static LanguageDescriptor> {
    let name = name.trim().trim_start_matches('.').to_ascii_lowercase();
    find(&name).or_else(|| LANGUAGES.iter().find(|l| l.extension == name))
}

const STARTERS: &[(&str, &str)] = &[
    (
        "python",
        r#"# Python (real execution)
def fibonacci(n):
    a, b = 0, 1
    for _ in range(n):
        print(a, end=" ")
        a, b = b, a + b
    print()

print("Fibonacci sequence:")
fibonacci(10)

# Try math
import math
print(f"pi = {math.pi:.6f}")
print(f"sqrt(2) = {math.sqrt(2):.6f}")"#,
    ),
    (
        "javascript",
        r#"// JavaScript (real sandboxed execution)
const fib = (n) => {
  let [a, b] = [0, 1];
  const result = [];
  for (let i = 0; i < n; i++) {
    result.push(a);
    [a, b] = [b, a + b];
  }
  return result;
};

console.log("Fibonacci:", fib(10).join(", "));

// Async example
const delay = ms => new Promise(r => setTimeout(r, ms));
async function run() {
  console.log("Starting async task...");
  await delay(100);
  console.log("Done!");
  console.log("2^10 =", Math.pow(2, 10));
}
run();"#,
    ),
    (
        "typescript",
        r#"// TypeScript (transpiled simulation)
interface Vector2D {
  x: number;
  y: number;
}

function magnitude(v: Vector2D): number {
  return Math.sqrt(v.x ** 2 + v.y ** 2);
}

function normalize(v: Vector2D): Vector2D {
  const m = magnitude(v);
  return { x: v.x / m, y: v.y / m };
}

const vec: Vector2D = { x: 3, y: 4 };
console.log("magnitude:", magnitude(vec));
console.log("normalized:", normalize(vec));"#,
    ),
    (
        "rust",
        r#"// Rust (compiled simulation)
fn fibonacci(n: u64) -> Vec<u64> {
    let mut seq = vec![0u64, 1u64];
    for i in 2..n as usize {
        let next = seq[i-1] + seq[i-2];
        seq.push(next);
    }
    seq.truncate(n as usize);
    seq
}

fn main() {
    let fib = fibonacci(10);
    println!("Fibonacci: {:?}", fib);

    // Ownership demo
    let s1 = String::from("hello");
    let s2 = s1.clone();
    println!("{} {}", s1, s2);
}"#,
    ),
    (
        "go",
        "package main\n\nimport (\n\t\"fmt\"\n\t\"math\"\n)\n\nfunc isPrime(n int) bool {\n\tif n < 2 { return false }\n\tfor i := 2; i <= int(math.Sqrt(float64(n))); i++ {\n\t\tif n%i == 0 { return false }\n\t}\n\treturn true\n}\n\nfunc main() {\n\tfmt.Println(\"Primes under 50:\")\n\tfor i := 2; i < 50; i++ {\n\t\tif isPrime(i) {\n\t\t\tfmt.Printf(\"%d \", i)\n\t\t}\n\t}\n\tfmt.Println()\n}",
    ),
    (
        "ruby",
        r#"# Ruby (interpreted simulation)
def quicksort(arr)
  return arr if arr.length <= 1
  pivot = arr[arr.length / 2]
  left  = arr.select { |x| x < pivot }
  mid   = arr.select { |x| x == pivot }
  right = arr.select { |x| x > pivot }
  quicksort(left) + mid + quicksort(right)
end

arr = [3, 6, 8, 10, 1, 2, 1]
puts "Unsorted: #{arr}"
puts "Sorted:   #{quicksort(arr)}""#,
    ),
    (
        "bash",
        r#"#!/bin/bash
# Bash (shell simulation)

echo "System Info:"
echo "  OS: Linux (capshield sandbox)"
echo "  Shell: bash 5.2"
echo ""

for i in $(seq 1 5); do
    echo "Loop iteration: $i"
done

echo ""
echo "Files in workspace:"
ls -la /workspace 2>/dev/null || echo "  main.py  index.js  README.md  styles.css""#,
    ),
    (
        "cpp",
        r#"#include <iostream>
#include <vector>
#include <algorithm>

template<typename T>
void bubbleSort(std::vector<T>& arr) {
    for (size_t i = 0; i < arr.size(); ++i)
        for (size_t j = 0; j < arr.size()-i-1; ++j)
            if (arr[j] > arr[j+1])
                std::swap(arr[j], arr[j+1]);
}

int main() {
    std::vector<int> v = {64, 34, 25, 12, 22, 11, 90};
    bubbleSort(v);
    std::cout << "Sorted: ";
    for (auto x : v) std::cout << x << " ";
    std::cout << std::endl;
    return 0;
}"#,
    ),
];

/// Starter source shown when a language is selected.
pub fn starter(id: &str) -> String {
    if let Some((_, source)) = STARTERS.iter().find(|(lang, _)| *lang == id) {
        return source.to_string();
    }
    let label = find(id).map(|l| l.label).unwrap_or(id);
    format!("// {label} code here\n")
}
