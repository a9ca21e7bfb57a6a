//! # SMS ゲートウェイアドレス
//!
//! 電話番号を、メールを SMS に変換するゲートウェイのアドレスに書き換える。
//!
//! ## テンプレート
//!
//! テンプレート中の `#` が数字の差し込み位置となる（例: `0#####@hyper.mobile`）。
//! `#` 以外の文字（先頭の固定数字やドメイン部）はそのまま残る。
//!
//! ## 桁合わせの規則
//!
//! 1. 電話番号から数字以外を取り除く
//! 2. `#` を右から順に、数字の右端から埋めていく（右寄せ）
//! 3. 数字が `#` より多い場合、余った先頭の数字は捨てる
//! 4. 数字が `#` より少ない場合、残りの `#` は `0` で埋める
//!
//! テンプレートが空の場合は空文字列を返す。このアドレスはトランスポートで
//! 宛先不正として失敗し、その時点でエラーとして表面化する。

/// 電話番号からゲートウェイ用メールアドレスを生成する
pub fn sms_address(gateway_template: &str, phone_number: &str) -> String {
    let mut digits = phone_number
        .chars()
        .filter(char::is_ascii_digit)
        .rev();

    let mut address: Vec<char> = gateway_template
        .chars()
        .rev()
        .map(|ch| {
            if ch == '#' {
                digits.next().unwrap_or('0')
            } else {
                ch
            }
        })
        .collect();
    address.reverse();
    address.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("0#####@hyper.mobile", "+79 (0) 123456", "023456@hyper.mobile")]
    #[case("#####@sms.example.com", "12345", "12345@sms.example.com")]
    #[case("#####@sms.example.com", "9876543210", "43210@sms.example.com")]
    #[case("#####@sms.example.com", "42", "00042@sms.example.com")]
    #[case("+##-###@gw.example.com", "12-345", "+12-345@gw.example.com")]
    #[case("fixed@gw.example.com", "12345", "fixed@gw.example.com")]
    fn test_数字は右寄せで差し込まれる(
        #[case] template: &str,
        #[case] phone: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(sms_address(template, phone), expected);
    }

    #[test]
    fn test_テンプレートが空の場合は空文字列を返す() {
        assert_eq!(sms_address("", "+420 123 456 789"), "");
    }

    #[test]
    fn test_数字を含まない電話番号はゼロで埋められる() {
        assert_eq!(sms_address("###@gw", "abc"), "000@gw");
    }

    #[test]
    fn test_同じ入力に対して常に同じ結果を返す() {
        let template = "0#####@hyper.mobile";
        let phone = "+79 (0) 123456";

        let first = sms_address(template, phone);
        for _ in 0..10 {
            assert_eq!(sms_address(template, phone), first);
        }
    }

    #[test]
    fn test_ドメイン部はテンプレートのまま残る() {
        for phone in ["1", "123456789012345", "+1 (555) 010-9999"] {
            assert!(sms_address("0#####@hyper.mobile", phone).ends_with("@hyper.mobile"));
        }
    }
}
